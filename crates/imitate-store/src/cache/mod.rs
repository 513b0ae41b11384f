//! Bounded in-memory residency of records.
//!
//! Callers [`pin`](RecordCache::pin) a key, [`materialize`](Pin::materialize)
//! its record, read or mutate it through the returned [`RecordRef`], then drop
//! both. A pinned slot is never evicted. Access to one key is serialized by
//! the slot's data lock, so a materialize always observes the last mutation
//! committed under a previous pin.
//!
//! Capacity is `base_capacity + floor(flex_index)`. The flex index moves one
//! step up when a pass finds the cache over capacity and one step down when it
//! finds slack, bounded to `[0, flexibility]`. Victims are the unpinned
//! resident records with the oldest update, ties broken by insertion order.

mod evict;
mod slot;

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};
use crate::identity::IdentityKey;
use crate::record::Record;
use crate::store::RecordStore;

use self::evict::Eviction;
use self::slot::{CacheState, SlotData};

/// Point-in-time cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Records held in memory.
    pub resident: usize,
    /// Slots with outstanding pins.
    pub pinned: usize,
    /// Tracked slots, resident or not.
    pub slots: usize,
    /// Current effective capacity.
    pub capacity: usize,
    /// Current flex adjustment on top of the base capacity.
    pub flex_index: f64,
}

/// Bounded, pin-aware cache in front of a [`RecordStore`].
#[derive(Debug)]
pub struct RecordCache {
    store: Arc<RecordStore>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl RecordCache {
    pub fn new(store: Arc<RecordStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config: config.normalized(),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `key` against eviction until the returned pin is dropped.
    pub fn pin(&self, key: &IdentityKey) -> Pin<'_> {
        self.lock_state().slot_mut(key).pins += 1;
        Pin {
            cache: self,
            key: key.clone(),
        }
    }

    /// Release one pin on `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` has no outstanding pin.
    fn unpin(&self, key: &IdentityKey) {
        if !self.release_pin(key) {
            panic!("unpin of {key} without a matching pin");
        }
    }

    fn release_pin(&self, key: &IdentityKey) -> bool {
        let mut state = self.lock_state();
        let Some(slot) = state.slots.get_mut(key) else {
            return false;
        };
        if slot.pins == 0 {
            return false;
        }
        slot.pins -= 1;
        if slot.pins == 0 && !slot.resident && !slot.evicting {
            state.slots.remove(key);
        }
        true
    }

    fn pinned_data(&self, key: &IdentityKey) -> Arc<AsyncMutex<SlotData>> {
        let data = {
            let state = self.lock_state();
            state
                .slots
                .get(key)
                .filter(|slot| slot.pins > 0)
                .map(|slot| Arc::clone(&slot.data))
        };
        match data {
            Some(data) => data,
            None => panic!("access to {key} without a pin"),
        }
    }

    async fn materialize<'p>(&'p self, key: &'p IdentityKey) -> StoreResult<RecordRef<'p>> {
        let mut slot = self.pinned_data(key).lock_owned().await;

        if slot.loaded {
            if let Some(entry) = self.lock_state().slots.get_mut(key) {
                entry.last_access = Instant::now();
            }
            debug!(key = %key, "cache hit");
        } else {
            self.enforce_capacity().await?;

            let (record, fresh) = match self.store.read_record(key).await {
                Ok(record) => (record, false),
                Err(StoreError::RecordNotFound { .. }) => (Record::default(), true),
                Err(e) => return Err(e),
            };
            debug!(key = %key, fresh, messages = record.messages.len(), "loaded record");

            let last_update = record.last_update;
            slot.record = record;
            slot.loaded = true;
            {
                let mut state = self.lock_state();
                let seq = state.next_seq();
                let entry = state.slot_mut(key);
                entry.resident = true;
                entry.dirty |= fresh;
                entry.last_update = last_update;
                entry.last_access = Instant::now();
                entry.seq = seq;
            }

            self.enforce_capacity().await?;
        }

        Ok(RecordRef {
            cache: self,
            key,
            record: OwnedMutexGuard::map(slot, |data| &mut data.record),
        })
    }

    /// One eviction pass: adjust the flex index and evict down to capacity.
    ///
    /// When too many slots are pinned the cache stays over capacity until a
    /// later pass.
    async fn enforce_capacity(&self) -> StoreResult<usize> {
        let evictions: Vec<Eviction<'_>> = {
            let mut state = self.lock_state();
            let resident = state.resident_count();
            let capacity = state.flex.capacity(self.config.base_capacity);
            state.flex.adjust(resident, capacity, &self.config);

            if resident <= capacity {
                return Ok(0);
            }

            let excess = resident - capacity;
            let victims = state.select_victims(excess, |_| true);
            if victims.len() < excess {
                debug!(
                    resident,
                    capacity,
                    pinned = state.pinned_count(),
                    "pinned records keep the cache over capacity"
                );
            }
            debug!(
                resident,
                capacity,
                evicting = victims.len(),
                flex_index = state.flex.value(),
                "eviction pass"
            );
            victims
                .into_iter()
                .map(|victim| Eviction::new(self, victim))
                .collect()
        };

        evict::write_back(evictions).await.inspect_err(|e| {
            warn!(error = %e, "eviction write-back failed");
        })
    }

    /// Mark a resident record as needing write-back. Returns false if not resident.
    pub fn mark_dirty(&self, key: &IdentityKey) -> bool {
        match self.lock_state().slots.get_mut(key) {
            Some(slot) if slot.resident => {
                slot.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Write every dirty resident record to the store. Does not evict.
    pub async fn flush_all(&self) -> StoreResult<usize> {
        let dirty: Vec<IdentityKey> = {
            let state = self.lock_state();
            state
                .slots
                .iter()
                .filter(|(_, slot)| slot.resident && slot.dirty)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut written = 0;
        for key in dirty {
            let _pin = self.pin(&key);
            let data = self.pinned_data(&key);
            let slot = data.lock().await;
            if !slot.loaded || !self.is_dirty(&key) {
                continue;
            }

            self.store
                .write_record(&key, &slot.record)
                .await
                .inspect_err(|e| warn!(key = %key, error = %e, "flush failed"))?;

            // Mutations need the data lock we hold, so nothing raced this write.
            if let Some(entry) = self.lock_state().slots.get_mut(&key) {
                entry.dirty = false;
            }
            written += 1;
        }

        if written > 0 {
            info!(written, "flushed dirty records");
        }
        Ok(written)
    }

    /// Evict unpinned records not accessed within `max_idle`.
    pub async fn unload_idle(&self, max_idle: Duration) -> StoreResult<usize> {
        let evictions: Vec<Eviction<'_>> = {
            let mut state = self.lock_state();
            state
                .select_victims(usize::MAX, |slot| slot.last_access.elapsed() >= max_idle)
                .into_iter()
                .map(|victim| Eviction::new(self, victim))
                .collect()
        };

        let unloaded = evict::write_back(evictions).await?;
        if unloaded > 0 {
            info!(unloaded, "unloaded idle records");
        }
        Ok(unloaded)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            resident: state.resident_count(),
            pinned: state.pinned_count(),
            slots: state.slots.len(),
            capacity: state.flex.capacity(self.config.base_capacity),
            flex_index: state.flex.value(),
        }
    }

    pub fn is_resident(&self, key: &IdentityKey) -> bool {
        self.lock_state()
            .slots
            .get(key)
            .is_some_and(|slot| slot.resident)
    }

    pub fn is_dirty(&self, key: &IdentityKey) -> bool {
        self.lock_state()
            .slots
            .get(key)
            .is_some_and(|slot| slot.dirty)
    }

    pub fn pin_count(&self, key: &IdentityKey) -> usize {
        self.lock_state()
            .slots
            .get(key)
            .map_or(0, |slot| slot.pins)
    }
}

/// An outstanding pin. Unpins on drop.
#[derive(Debug)]
pub struct Pin<'a> {
    cache: &'a RecordCache,
    key: IdentityKey,
}

impl Pin<'_> {
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Load the record into the cache if needed and lock it for this pin.
    pub async fn materialize(&mut self) -> StoreResult<RecordRef<'_>> {
        self.cache.materialize(&self.key).await
    }

    /// Unpin explicitly. Equivalent to dropping the pin.
    pub fn release(self) {}
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.cache.unpin(&self.key);
    }
}

/// Locked access to a resident record.
#[derive(Debug)]
pub struct RecordRef<'p> {
    cache: &'p RecordCache,
    key: &'p IdentityKey,
    record: OwnedMappedMutexGuard<SlotData, Record>,
}

impl RecordRef<'_> {
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn messages(&self) -> &[String] {
        &self.record.messages
    }

    /// Append a message; the record becomes dirty.
    pub fn append(&mut self, message: impl Into<String>) {
        self.record.push(message);
        let last_update = self.record.last_update;
        if let Some(slot) = self.cache.lock_state().slots.get_mut(self.key) {
            slot.dirty = true;
            slot.last_update = last_update;
        }
    }

    pub fn mark_dirty(&self) {
        self.cache.mark_dirty(self.key);
    }
}

impl Deref for RecordRef<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}
