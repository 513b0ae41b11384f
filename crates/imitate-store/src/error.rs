//! Error types for the record store.

use crate::integrity::IntegrityStatus;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The metadata index exists but cannot be parsed.
    #[error("corrupt metadata index at {path}: {message}")]
    CorruptIndex { path: String, message: String },

    /// A record file exists but cannot be parsed.
    #[error("corrupt record {key}: {message}")]
    CorruptRecord { key: String, message: String },

    /// No record file exists for the key.
    #[error("record not found: {key}")]
    RecordNotFound { key: String },

    /// Disk read or write failure.
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },

    /// The stored index was written by an incompatible schema.
    #[error("incompatible schema: found {found}, expected {expected}")]
    IncompatibleSchema { found: String, expected: String },

    /// The index and the record files disagree.
    #[error("integrity violation: {0}")]
    Integrity(IntegrityStatus),

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,

    /// An alias request was rejected.
    #[error("alias {alias} -> {canonical} rejected: {reason}")]
    AliasConflict {
        alias: String,
        canonical: String,
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,
            Self::AliasConflict { .. } => 1,

            // Data that cannot be trusted
            Self::CorruptIndex { .. } => 3,
            Self::IncompatibleSchema { .. } => 3,
            Self::Integrity(_) => 3,
            Self::CorruptRecord { .. } => 4,

            Self::Io { .. } => 5,
            Self::RecordNotFound { .. } => 6,
            Self::StoreClosed => 6,
        }
    }

    /// Whether the error aborts startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CorruptIndex { .. } | Self::IncompatibleSchema { .. } | Self::Integrity(_)
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
