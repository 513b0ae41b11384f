//! Durable per-identity message histories behind a bounded, pin-aware cache.
//!
//! This crate provides:
//!
//! - Hashed identity keys and the on-disk record layout
//! - Path-scoped file locking with atomic writes
//! - A capacity-bounded record cache with pinning and adaptive eviction
//! - A startup integrity audit of the metadata index against record files
//! - The [`Storage`] facade tying these together, with periodic write-back
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `IMITATE_DATA_DIR` | Data directory (default: `./data/imitate_db/`) |
//! | `IMITATE_CACHE_CAPACITY` | Base cache capacity (default: 5) |
//! | `IMITATE_CACHE_FLEXIBILITY` | Flex index ceiling (default: 2.0) |
//! | `IMITATE_CACHE_FLEX_STEP` | Flex index step per eviction pass (default: 0.5) |
//! | `IMITATE_WRITEBACK_SECS` | Periodic flush interval (default: 120) |
//! | `IMITATE_UNLOAD_SECS` | Idle unload threshold (default: 300) |

pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod integrity;
pub mod record;
pub mod storage;
pub mod store;

// Re-export main types
pub use cache::{CacheStats, Pin, RecordCache, RecordRef};
pub use config::{CacheConfig, StorageConfig};
pub use error::{StoreError, StoreResult};
pub use guard::{FileGuard, FileLocks};
pub use identity::{hash_identity, IdentityKey};
pub use integrity::{check, IntegrityStatus};
pub use record::{MetadataIndex, Record, INDEX_FILE, SCHEMA_VERSION};
pub use storage::Storage;
pub use store::RecordStore;
