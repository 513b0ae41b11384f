//! Identity hashing.
//!
//! Raw identities never reach the file system: every record is addressed by
//! the SHA-256 digest of the identity, hex encoded.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded identity key.
pub const KEY_LEN: usize = 64;

const RECORD_PREFIX: &str = "user_";
const RECORD_SUFFIX: &str = ".json";

/// Fixed-length storage key derived from an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Parse a hex key, rejecting anything that could not have come from [`hash_identity`].
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == KEY_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    /// Recover the key from a record file name (`user_<key>.json`).
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_prefix(RECORD_PREFIX)
            .and_then(|rest| rest.strip_suffix(RECORD_SUFFIX))
            .and_then(Self::parse)
    }

    /// Record file name for this key.
    pub fn file_name(&self) -> String {
        format!("{RECORD_PREFIX}{}{RECORD_SUFFIX}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid identity key: {value:?}"))
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

/// Hash an external identity into its storage key.
pub fn hash_identity(identity: &str) -> IdentityKey {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    IdentityKey(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        // sha256("alice")
        assert_eq!(
            hash_identity("alice").as_str(),
            "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
        );
        assert_eq!(hash_identity("alice"), hash_identity("alice"));
        assert_ne!(hash_identity("alice"), hash_identity("Alice"));
        assert_eq!(hash_identity("U024BE7LH").as_str().len(), KEY_LEN);
    }

    #[test]
    fn file_name_roundtrip() {
        let key = hash_identity("bob");
        let name = key.file_name();
        assert!(name.starts_with("user_"));
        assert!(name.ends_with(".json"));
        assert_eq!(IdentityKey::from_file_name(&name), Some(key));
    }

    #[test]
    fn rejects_foreign_file_names() {
        assert!(IdentityKey::from_file_name("meta.json").is_none());
        assert!(IdentityKey::from_file_name("user_abc.json").is_none());
        let upper = format!("user_{}.json", "A".repeat(KEY_LEN));
        assert!(IdentityKey::from_file_name(&upper).is_none());
        let tmp = format!("user_{}.tmp", "a".repeat(KEY_LEN));
        assert!(IdentityKey::from_file_name(&tmp).is_none());
    }

    #[test]
    fn deserialize_validates() {
        let key = hash_identity("carol");
        let json = serde_json::to_string(&key).unwrap();
        let back: IdentityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<IdentityKey>("\"../../etc/passwd\"").is_err());
    }
}
