//! Slot bookkeeping, flex policy and victim ranking.
//!
//! Everything here runs under the cache's state mutex and never awaits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::CacheConfig;
use crate::identity::IdentityKey;
use crate::record::Record;

/// Record storage for one slot. Locked for the whole of a pinned access.
#[derive(Debug, Default)]
pub(crate) struct SlotData {
    pub(crate) loaded: bool,
    pub(crate) record: Record,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) pins: usize,
    pub(crate) resident: bool,
    /// Selected for eviction, write-back in progress.
    pub(crate) evicting: bool,
    pub(crate) dirty: bool,
    pub(crate) last_update: Option<f64>,
    pub(crate) last_access: Instant,
    /// Insertion order, for ranking ties.
    pub(crate) seq: u64,
    pub(crate) data: Arc<AsyncMutex<SlotData>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            pins: 0,
            resident: false,
            evicting: false,
            dirty: false,
            last_update: None,
            last_access: Instant::now(),
            seq: 0,
            data: Arc::new(AsyncMutex::new(SlotData::default())),
        }
    }
}

/// Hysteresis adjustment to the cache capacity, kept in `[0, flexibility]`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct FlexIndex(f64);

impl FlexIndex {
    pub(crate) fn value(self) -> f64 {
        self.0
    }

    pub(crate) fn capacity(self, base: usize) -> usize {
        base + self.0.floor() as usize
    }

    /// One step up under pressure, one step down under slack.
    pub(crate) fn adjust(&mut self, resident: usize, capacity: usize, config: &CacheConfig) {
        if resident < capacity && self.0 > 0.0 {
            self.0 = (self.0 - config.flex_step).max(0.0);
        } else if resident > capacity && self.0 < config.flexibility {
            self.0 = (self.0 + config.flex_step).min(config.flexibility);
        }
    }
}

/// A slot chosen for eviction, with its data lock held.
pub(crate) struct Victim {
    pub(crate) key: IdentityKey,
    pub(crate) slot: OwnedMutexGuard<SlotData>,
    pub(crate) was_dirty: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) slots: HashMap<IdentityKey, Slot>,
    pub(crate) flex: FlexIndex,
    next_seq: u64,
}

impl CacheState {
    pub(crate) fn slot_mut(&mut self, key: &IdentityKey) -> &mut Slot {
        self.slots.entry(key.clone()).or_insert_with(Slot::new)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn resident_count(&self) -> usize {
        self.slots.values().filter(|s| s.resident).count()
    }

    pub(crate) fn pinned_count(&self) -> usize {
        self.slots.values().filter(|s| s.pins > 0).count()
    }

    /// Take up to `limit` unpinned resident slots, oldest update first.
    ///
    /// Chosen slots leave residency immediately so concurrent passes do not
    /// count them; the caller owns restoring them if write-back fails.
    pub(crate) fn select_victims(
        &mut self,
        limit: usize,
        eligible: impl Fn(&Slot) -> bool,
    ) -> Vec<Victim> {
        let mut candidates: Vec<(IdentityKey, f64, u64)> = self
            .slots
            .iter()
            .filter(|(_, s)| s.resident && s.pins == 0 && !s.evicting && eligible(s))
            .map(|(k, s)| (k.clone(), s.last_update.unwrap_or(f64::NEG_INFINITY), s.seq))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut victims = Vec::new();
        for (key, _, _) in candidates {
            if victims.len() == limit {
                break;
            }
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            // Unpinned slots are unlocked; a busy one is skipped rather than awaited.
            let Ok(guard) = Arc::clone(&slot.data).try_lock_owned() else {
                continue;
            };
            slot.resident = false;
            slot.evicting = true;
            victims.push(Victim {
                key,
                slot: guard,
                was_dirty: slot.dirty,
            });
        }
        victims
    }
}
