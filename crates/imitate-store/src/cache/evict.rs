//! Write-back of eviction victims.

use tracing::debug;

use crate::error::StoreResult;
use crate::record::Record;

use super::slot::Victim;
use super::RecordCache;

/// An in-flight eviction.
///
/// Dropping an unfinished eviction (write failure, cancelled future) puts the
/// slot back into residency with its dirty flag intact. The map is updated
/// before the slot's data lock is released.
pub(super) struct Eviction<'a> {
    cache: &'a RecordCache,
    victim: Victim,
    completed: bool,
}

impl<'a> Eviction<'a> {
    pub(super) fn new(cache: &'a RecordCache, victim: Victim) -> Self {
        Self {
            cache,
            victim,
            completed: false,
        }
    }

    async fn persist(&mut self) -> StoreResult<()> {
        let victim = &mut self.victim;
        if victim.was_dirty {
            self.cache
                .store
                .write_record(&victim.key, &victim.slot.record)
                .await?;
        }
        victim.slot.record = Record::default();
        victim.slot.loaded = false;
        self.completed = true;
        debug!(key = %victim.key, written = victim.was_dirty, "evicted record");
        Ok(())
    }
}

impl Drop for Eviction<'_> {
    fn drop(&mut self) {
        let key = &self.victim.key;
        let mut state = self.cache.lock_state();
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };
        slot.evicting = false;
        if self.completed {
            slot.dirty = false;
            if slot.pins == 0 {
                state.slots.remove(key);
            }
        } else {
            slot.resident = true;
        }
    }
}

/// Persist and unload each victim in turn. Stops at the first failure; the
/// failed victim and all remaining ones stay resident.
pub(super) async fn write_back(evictions: Vec<Eviction<'_>>) -> StoreResult<usize> {
    let mut evicted = 0;
    for mut eviction in evictions {
        eviction.persist().await?;
        evicted += 1;
    }
    Ok(evicted)
}
