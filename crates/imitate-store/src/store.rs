//! Durable persistence of the metadata index and per-identity records.
//!
//! All reads and writes hold the [`FileGuard`](crate::guard::FileGuard) of
//! the target path for their full duration. Writes go to a temp file that is
//! renamed over the target, so readers never observe a partial file.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::guard::FileLocks;
use crate::identity::IdentityKey;
use crate::record::{MetadataIndex, Record, INDEX_FILE};

/// File-backed record store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    data_dir: PathBuf,
    locks: FileLocks,
}

impl RecordStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: FileLocks::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &FileLocks {
        &self.locks
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    pub fn record_path(&self, key: &IdentityKey) -> PathBuf {
        self.data_dir.join(key.file_name())
    }

    /// Create the data directory if needed.
    pub async fn prepare(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))
    }

    /// Read the index. A missing file yields an empty index.
    pub async fn read_index(&self) -> StoreResult<MetadataIndex> {
        let path = self.index_path();
        let _guard = self.locks.acquire(&path).await;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no metadata index, starting empty");
                return Ok(MetadataIndex::default());
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        serde_json::from_str(&content).map_err(|e| StoreError::CorruptIndex {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub async fn write_index(&self, index: &MetadataIndex) -> StoreResult<()> {
        let path = self.index_path();
        let json = serde_json::to_string(index).map_err(|e| StoreError::io(&path, e))?;

        let _guard = self.locks.acquire(&path).await;
        write_atomic(&path, &json).await?;
        debug!(names = index.names.len(), aliases = index.aliases.len(), "wrote metadata index");
        Ok(())
    }

    pub async fn read_record(&self, key: &IdentityKey) -> StoreResult<Record> {
        let path = self.record_path(key);
        let _guard = self.locks.acquire(&path).await;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::RecordNotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        serde_json::from_str(&content).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn write_record(&self, key: &IdentityKey, record: &Record) -> StoreResult<()> {
        let path = self.record_path(key);
        let json = serde_json::to_string(record).map_err(|e| StoreError::io(&path, e))?;

        let _guard = self.locks.acquire(&path).await;
        write_atomic(&path, &json).await?;
        debug!(key = %key, messages = record.messages.len(), "wrote record");
        Ok(())
    }

    pub async fn record_exists(&self, key: &IdentityKey) -> StoreResult<bool> {
        let path = self.record_path(key);
        let _guard = self.locks.acquire(&path).await;
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Keys of every record file on disk.
    pub async fn list_record_keys(&self) -> StoreResult<BTreeSet<IdentityKey>> {
        let mut keys = BTreeSet::new();

        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(StoreError::io(&self.data_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))?
        {
            let name = entry.file_name();
            if let Some(key) = IdentityKey::from_file_name(&name.to_string_lossy()) {
                keys.insert(key);
            }
        }

        Ok(keys)
    }
}

async fn write_atomic(path: &Path, content: &str) -> StoreResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| StoreError::io(&temp_path, e))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;

    Ok(())
}
