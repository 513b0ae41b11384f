//! On-disk data model: per-identity records and the metadata index.
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!   meta.json            # {"version", "names": {identity: key}, "aliases": {identity: identity}}
//!   user_<key>.json      # {"messages": [...], "last_update": <epoch seconds | null>}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{hash_identity, IdentityKey};

/// Schema version written to, and required of, the metadata index.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Metadata index file name.
pub const INDEX_FILE: &str = "meta.json";

/// One identity's message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Messages in the order they were appended.
    #[serde(default)]
    pub messages: Vec<String>,

    /// When the last message was appended (epoch seconds).
    #[serde(default)]
    pub last_update: Option<f64>,
}

impl Record {
    /// Append a message and stamp the update time.
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
        self.last_update = Some(epoch_seconds());
    }

    /// Messages joined with newlines.
    pub fn joined(&self) -> String {
        self.messages.join("\n")
    }
}

pub(crate) fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Process-wide index of known identities and aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataIndex {
    /// Schema version.
    pub version: String,

    /// Identity to storage key.
    #[serde(default)]
    pub names: BTreeMap<String, IdentityKey>,

    /// Alias identity to canonical identity.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            names: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl MetadataIndex {
    /// Resolve one alias hop.
    pub fn resolve<'a>(&'a self, identity: &'a str) -> &'a str {
        self.aliases
            .get(identity)
            .map(String::as_str)
            .unwrap_or(identity)
    }

    /// Storage key for an identity, after alias resolution.
    pub fn key_for(&self, identity: &str) -> IdentityKey {
        let canonical = self.resolve(identity);
        match self.names.get(canonical) {
            Some(key) => key.clone(),
            None => hash_identity(canonical),
        }
    }

    /// Whether the identity (after alias resolution) owns a record.
    pub fn contains(&self, identity: &str) -> bool {
        self.names.contains_key(self.resolve(identity))
    }

    pub fn is_compatible(&self) -> bool {
        self.version == SCHEMA_VERSION
    }
}
