//! The storage facade: identity registration, message access and lifecycle.
//!
//! ```no_run
//! use imitate_store::{Storage, StorageConfig};
//!
//! # async fn example() -> imitate_store::StoreResult<()> {
//! let storage = Storage::open(StorageConfig::from_env()).await?;
//! storage.append_message("alice", "hi").await?;
//! assert_eq!(storage.get_messages("alice").await?, vec!["hi".to_string()]);
//! storage.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, RecordCache};
use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::identity::{hash_identity, IdentityKey};
use crate::integrity;
use crate::record::{MetadataIndex, Record, SCHEMA_VERSION};
use crate::store::RecordStore;

/// Persistent per-identity message histories behind a bounded cache.
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
    store: Arc<RecordStore>,
    cache: RecordCache,
    index: RwLock<MetadataIndex>,
    /// Set once closed. Operations hold a read guard for their duration.
    closed: RwLock<bool>,
}

impl Storage {
    /// Open the data directory.
    ///
    /// Fails without touching any record if the index is corrupt, was written
    /// by another schema version, or disagrees with the record files on disk.
    pub async fn open(config: StorageConfig) -> StoreResult<Self> {
        let config = config.normalized();
        let store = Arc::new(RecordStore::new(config.data_dir.clone()));
        store.prepare().await?;

        let index_present = tokio::fs::try_exists(store.index_path())
            .await
            .map_err(|e| StoreError::io(store.index_path(), e))?;
        let index = store.read_index().await?;
        if !index.is_compatible() {
            error!(found = %index.version, expected = SCHEMA_VERSION, "incompatible schema");
            return Err(StoreError::IncompatibleSchema {
                found: index.version,
                expected: SCHEMA_VERSION.to_string(),
            });
        }

        let on_disk = store.list_record_keys().await?;
        integrity::check(&index, &on_disk)
            .into_result()
            .inspect_err(|e| {
                error!(
                    data_dir = %store.data_dir().display(),
                    error = %e,
                    "integrity check failed"
                );
            })?;

        if !index_present {
            store.write_index(&index).await?;
        }

        info!(
            data_dir = %store.data_dir().display(),
            identities = index.names.len(),
            aliases = index.aliases.len(),
            "opened storage"
        );

        let cache = RecordCache::new(Arc::clone(&store), config.cache.clone());
        Ok(Self {
            config,
            store,
            cache,
            index: RwLock::new(index),
            closed: RwLock::new(false),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    async fn ensure_open(&self) -> StoreResult<RwLockReadGuard<'_, bool>> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StoreError::StoreClosed);
        }
        Ok(closed)
    }

    /// Key for `identity`, registering it first if it has never been seen.
    ///
    /// A new identity gets an empty record file before it enters the index,
    /// so the index never names an identity without a backing file.
    async fn ensure_registered(&self, identity: &str) -> StoreResult<IdentityKey> {
        {
            let index = self.index.read().await;
            if index.contains(identity) {
                return Ok(index.key_for(identity));
            }
        }

        let mut index = self.index.write().await;
        if index.contains(identity) {
            return Ok(index.key_for(identity));
        }

        let canonical = index.resolve(identity).to_string();
        let key = hash_identity(&canonical);
        if !self.store.record_exists(&key).await? {
            self.store.write_record(&key, &Record::default()).await?;
        }
        index.names.insert(canonical.clone(), key.clone());
        debug!(identity = %canonical, key = %key, "registered identity");

        // On failure the entry stays in memory and is written by the next flush.
        self.store.write_index(&index).await?;
        Ok(key)
    }

    /// Message history of `identity`, oldest first. Unseen identities are
    /// registered and yield an empty history.
    pub async fn get_messages(&self, identity: &str) -> StoreResult<Vec<String>> {
        let _open = self.ensure_open().await?;
        let key = self.ensure_registered(identity).await?;

        let mut pin = self.cache.pin(&key);
        let record = pin.materialize().await?;
        let messages = record.messages.clone();
        Ok(messages)
    }

    /// Message history joined by newlines.
    pub async fn get_messages_joined(&self, identity: &str) -> StoreResult<String> {
        let _open = self.ensure_open().await?;
        let key = self.ensure_registered(identity).await?;

        let mut pin = self.cache.pin(&key);
        let record = pin.materialize().await?;
        let joined = record.joined();
        Ok(joined)
    }

    /// Append `text` to the history of `identity`.
    pub async fn append_message(&self, identity: &str, text: &str) -> StoreResult<()> {
        let _open = self.ensure_open().await?;
        let key = self.ensure_registered(identity).await?;

        let mut pin = self.cache.pin(&key);
        let mut record = pin.materialize().await?;
        record.append(text);
        debug!(key = %key, messages = record.messages.len(), "appended message");
        Ok(())
    }

    /// Make `alias` resolve to the record of `canonical`.
    ///
    /// Rebinding an existing alias is allowed. The index is written
    /// immediately.
    pub async fn add_alias(&self, alias: &str, canonical: &str) -> StoreResult<()> {
        let _open = self.ensure_open().await?;
        let mut index = self.index.write().await;

        let rejection = if alias == canonical {
            Some("alias and canonical identity are the same")
        } else if index.names.contains_key(alias) {
            Some("alias already owns a record")
        } else if index.aliases.contains_key(canonical) {
            Some("canonical identity is itself an alias")
        } else if !index.names.contains_key(canonical) {
            Some("canonical identity is unknown")
        } else {
            None
        };
        if let Some(reason) = rejection {
            warn!(alias, canonical, reason, "alias rejected");
            return Err(StoreError::AliasConflict {
                alias: alias.to_string(),
                canonical: canonical.to_string(),
                reason: reason.to_string(),
            });
        }

        let previous = index
            .aliases
            .insert(alias.to_string(), canonical.to_string());
        if let Err(e) = self.store.write_index(&index).await {
            match previous {
                Some(target) => index.aliases.insert(alias.to_string(), target),
                None => index.aliases.remove(alias),
            };
            return Err(e);
        }

        info!(alias, canonical, "added alias");
        Ok(())
    }

    /// Write every dirty record, then the index. Returns the records written.
    pub async fn flush(&self) -> StoreResult<usize> {
        let _open = self.ensure_open().await?;
        self.flush_inner().await
    }

    async fn flush_inner(&self) -> StoreResult<usize> {
        let written = self.cache.flush_all().await?;
        let index = self.index.read().await;
        self.store.write_index(&index).await?;
        Ok(written)
    }

    /// Flush, then unload records idle longer than `unload_after_secs`.
    pub async fn maintain(&self) -> StoreResult<()> {
        let _open = self.ensure_open().await?;
        let flushed = self.flush_inner().await?;
        let unloaded = self.cache.unload_idle(self.config.unload_after()).await?;
        debug!(flushed, unloaded, "maintenance pass");
        Ok(())
    }

    /// Flush and refuse all further operations.
    ///
    /// Waits for in-flight operations. If the final flush fails the storage
    /// stays open so the caller can retry. Closing twice is `StoreClosed`.
    pub async fn close(&self) -> StoreResult<()> {
        let mut closed = self.closed.write().await;
        if *closed {
            return Err(StoreError::StoreClosed);
        }

        let written = self
            .flush_inner()
            .await
            .inspect_err(|e| error!(error = %e, "final flush failed"))?;
        *closed = true;
        info!(written, "closed storage");
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    /// Run [`maintain`](Self::maintain) every `writeback_interval_secs` until
    /// `shutdown` turns true or its sender is dropped, then
    /// [`close`](Self::close).
    ///
    /// The caller owns the task that drives this future.
    pub async fn run_maintenance(&self, mut shutdown: watch::Receiver<bool>) -> StoreResult<()> {
        let mut ticker = tokio::time::interval(self.config.writeback_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.maintain().await {
                        Ok(()) => {}
                        Err(StoreError::StoreClosed) => return Ok(()),
                        Err(e) => warn!(error = %e, "periodic maintenance failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("shutdown requested");
        match self.close().await {
            Err(StoreError::StoreClosed) => Ok(()),
            result => result,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Identities that own a record.
    pub async fn identity_count(&self) -> usize {
        self.index.read().await.names.len()
    }

    /// Storage key `identity` resolves to, registered or not.
    pub async fn key_for(&self, identity: &str) -> IdentityKey {
        self.index.read().await.key_for(identity)
    }

    /// A copy of the current index.
    pub async fn index(&self) -> MetadataIndex {
        self.index.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_test_storage(base_capacity: usize) -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::default()
            .with_data_dir(temp_dir.path().join("db"))
            .with_base_capacity(base_capacity);
        let storage = Storage::open(config).await.unwrap();
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn test_open_writes_fresh_index() {
        let (storage, temp_dir) = open_test_storage(5).await;
        let index_path = temp_dir.path().join("db").join("meta.json");
        assert!(index_path.exists());
        assert_eq!(storage.identity_count().await, 0);

        let on_disk: MetadataIndex =
            serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
        assert_eq!(on_disk.version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_registration_is_eager() {
        let (storage, _temp_dir) = open_test_storage(5).await;
        let key = storage.key_for("carol").await;

        storage.append_message("carol", "hello").await.unwrap();

        assert!(storage.store().record_exists(&key).await.unwrap());
        let index = storage.store().read_index().await.unwrap();
        assert_eq!(index.names.get("carol"), Some(&key));
        // The file was created empty; the message is still only in memory.
        let record = storage.store().read_record(&key).await.unwrap();
        assert!(record.messages.is_empty());
        assert!(storage.cache().is_dirty(&key));
    }

    #[tokio::test]
    async fn test_alias_rules() {
        let (storage, _temp_dir) = open_test_storage(5).await;
        storage.append_message("alice", "hi").await.unwrap();
        storage.append_message("bob", "yo").await.unwrap();

        storage.add_alias("ally", "alice").await.unwrap();
        assert_eq!(storage.get_messages("ally").await.unwrap(), vec!["hi"]);

        let reasons = [
            ("alice", "alice"),
            ("bob", "alice"),
            ("al", "ally"),
            ("ghost", "casper"),
        ];
        for (alias, canonical) in reasons {
            let err = storage.add_alias(alias, canonical).await.unwrap_err();
            assert!(
                matches!(err, StoreError::AliasConflict { .. }),
                "{alias} -> {canonical}: {err}"
            );
        }
        assert_eq!(storage.index().await.aliases.len(), 1);
    }

    #[tokio::test]
    async fn test_appends_through_alias_reach_canonical_record() {
        let (storage, _temp_dir) = open_test_storage(5).await;
        storage.append_message("alice", "one").await.unwrap();
        storage.add_alias("ally", "alice").await.unwrap();
        storage.append_message("ally", "two").await.unwrap();

        assert_eq!(
            storage.get_messages_joined("alice").await.unwrap(),
            "one\ntwo"
        );
        assert_eq!(storage.identity_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_twice_is_store_closed() {
        let (storage, _temp_dir) = open_test_storage(5).await;
        storage.append_message("alice", "hi").await.unwrap();

        storage.close().await.unwrap();
        assert!(storage.is_closed().await);
        assert!(matches!(
            storage.close().await,
            Err(StoreError::StoreClosed)
        ));
        assert!(matches!(
            storage.get_messages("alice").await,
            Err(StoreError::StoreClosed)
        ));
        assert!(matches!(storage.flush().await, Err(StoreError::StoreClosed)));
    }

    #[tokio::test]
    async fn test_maintain_unloads_idle_records() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::default()
            .with_data_dir(temp_dir.path())
            .with_unload_after(std::time::Duration::ZERO);
        let storage = Storage::open(config).await.unwrap();
        storage.append_message("alice", "hi").await.unwrap();
        assert_eq!(storage.stats().resident, 1);

        storage.maintain().await.unwrap();

        assert_eq!(storage.stats().resident, 0);
        let key = storage.key_for("alice").await;
        let record = storage.store().read_record(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi"]);
    }
}
