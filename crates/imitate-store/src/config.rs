//! Storage configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Cache sizing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Resident records kept before eviction starts.
    #[serde(default = "default_base_capacity")]
    pub base_capacity: usize,

    /// Upper bound of the flex index.
    #[serde(default = "default_flexibility")]
    pub flexibility: f64,

    /// Flex index adjustment per eviction pass.
    #[serde(default = "default_flex_step")]
    pub flex_step: f64,
}

fn default_base_capacity() -> usize {
    5
}

fn default_flexibility() -> f64 {
    2.0
}

fn default_flex_step() -> f64 {
    0.5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_capacity: default_base_capacity(),
            flexibility: default_flexibility(),
            flex_step: default_flex_step(),
        }
    }
}

impl CacheConfig {
    /// Clamp to usable values.
    pub fn normalized(mut self) -> Self {
        self.base_capacity = self.base_capacity.max(1);
        if !self.flexibility.is_finite() || self.flexibility < 0.0 {
            self.flexibility = 0.0;
        }
        if !self.flex_step.is_finite() || self.flex_step <= 0.0 {
            self.flex_step = default_flex_step();
        }
        self
    }

    /// Hard ceiling on resident unpinned records.
    pub fn ceiling(&self) -> usize {
        self.base_capacity + self.flexibility.floor() as usize
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `meta.json` and the record files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Seconds between periodic flushes.
    #[serde(default = "default_writeback_interval")]
    pub writeback_interval_secs: u64,

    /// Seconds a record may sit unused in the cache before it is unloaded.
    #[serde(default = "default_unload_after")]
    pub unload_after_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/imitate_db/")
}

fn default_writeback_interval() -> u64 {
    2 * 60
}

fn default_unload_after() -> u64 {
    5 * 60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache: CacheConfig::default(),
            writeback_interval_secs: default_writeback_interval(),
            unload_after_secs: default_unload_after(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `IMITATE_DATA_DIR` | Data directory |
    /// | `IMITATE_CACHE_CAPACITY` | Base cache capacity |
    /// | `IMITATE_CACHE_FLEXIBILITY` | Flex index ceiling |
    /// | `IMITATE_CACHE_FLEX_STEP` | Flex index step |
    /// | `IMITATE_WRITEBACK_SECS` | Periodic flush interval |
    /// | `IMITATE_UNLOAD_SECS` | Idle unload threshold |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("IMITATE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache: CacheConfig {
                base_capacity: env_parse("IMITATE_CACHE_CAPACITY")
                    .unwrap_or(defaults.cache.base_capacity),
                flexibility: env_parse("IMITATE_CACHE_FLEXIBILITY")
                    .unwrap_or(defaults.cache.flexibility),
                flex_step: env_parse("IMITATE_CACHE_FLEX_STEP")
                    .unwrap_or(defaults.cache.flex_step),
            },
            writeback_interval_secs: env_parse("IMITATE_WRITEBACK_SECS")
                .unwrap_or(defaults.writeback_interval_secs),
            unload_after_secs: env_parse("IMITATE_UNLOAD_SECS")
                .unwrap_or(defaults.unload_after_secs),
        }
    }

    /// Load config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_yaml::from_str(&content).map_err(|e| StoreError::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set the base cache capacity.
    pub fn with_base_capacity(mut self, base_capacity: usize) -> Self {
        self.cache.base_capacity = base_capacity;
        self
    }

    /// Set the flex ceiling and step.
    pub fn with_flexibility(mut self, flexibility: f64, flex_step: f64) -> Self {
        self.cache.flexibility = flexibility;
        self.cache.flex_step = flex_step;
        self
    }

    pub fn with_writeback_interval(mut self, interval: Duration) -> Self {
        self.writeback_interval_secs = interval.as_secs();
        self
    }

    pub fn with_unload_after(mut self, idle: Duration) -> Self {
        self.unload_after_secs = idle.as_secs();
        self
    }

    pub fn normalized(mut self) -> Self {
        self.cache = self.cache.normalized();
        self.writeback_interval_secs = self.writeback_interval_secs.max(1);
        self
    }

    pub fn writeback_interval(&self) -> Duration {
        Duration::from_secs(self.writeback_interval_secs)
    }

    pub fn unload_after(&self) -> Duration {
        Duration::from_secs(self.unload_after_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
