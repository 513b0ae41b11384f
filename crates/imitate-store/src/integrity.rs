//! Startup audit of the metadata index against the record files on disk.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{StoreError, StoreResult};
use crate::identity::IdentityKey;
use crate::record::MetadataIndex;

/// Outcome of an integrity check. Anything but `Okay` is fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Okay,
    /// An indexed identity has no record file.
    MissingRecordFile { identity: String, key: IdentityKey },
    /// An alias points at something that is not a known, non-aliased identity,
    /// or the alias itself owns a record.
    AliasMismatch { alias: String, target: String },
    /// Two indexed identities share one record file.
    NameFileCollision { identity: String, key: IdentityKey },
    /// Record files exist that no indexed identity owns.
    ExtraneousRecordFiles { keys: Vec<IdentityKey> },
}

impl IntegrityStatus {
    pub fn is_okay(&self) -> bool {
        matches!(self, Self::Okay)
    }

    pub fn into_result(self) -> StoreResult<()> {
        match self {
            Self::Okay => Ok(()),
            violation => Err(StoreError::Integrity(violation)),
        }
    }
}

impl fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Okay => write!(f, "okay"),
            Self::MissingRecordFile { identity, key } => {
                write!(f, "missing record file for {identity:?} ({key})")
            }
            Self::AliasMismatch { alias, target } => {
                write!(f, "alias {alias:?} -> {target:?} is not a single-hop alias")
            }
            Self::NameFileCollision { identity, key } => {
                write!(f, "{identity:?} collides on record file {key}")
            }
            Self::ExtraneousRecordFiles { keys } => {
                write!(f, "{} record file(s) without an index entry", keys.len())
            }
        }
    }
}

/// Check that the index and the on-disk record files correspond 1:1.
pub fn check(index: &MetadataIndex, on_disk: &BTreeSet<IdentityKey>) -> IntegrityStatus {
    let mut unmatched = on_disk.clone();
    let mut matched = BTreeSet::new();

    for (identity, key) in &index.names {
        if unmatched.remove(key) {
            matched.insert(key.clone());
        } else if matched.contains(key) {
            return IntegrityStatus::NameFileCollision {
                identity: identity.clone(),
                key: key.clone(),
            };
        } else {
            return IntegrityStatus::MissingRecordFile {
                identity: identity.clone(),
                key: key.clone(),
            };
        }
    }

    // Targets must own a record directly; chains longer than one hop are not followed.
    // An alias that also owns a record would shadow it.
    for (alias, target) in &index.aliases {
        if !index.names.contains_key(target)
            || index.aliases.contains_key(target)
            || index.names.contains_key(alias)
        {
            return IntegrityStatus::AliasMismatch {
                alias: alias.clone(),
                target: target.clone(),
            };
        }
    }

    if !unmatched.is_empty() {
        return IntegrityStatus::ExtraneousRecordFiles {
            keys: unmatched.into_iter().collect(),
        };
    }

    IntegrityStatus::Okay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::hash_identity;

    fn index_with(names: &[&str]) -> MetadataIndex {
        let mut index = MetadataIndex::default();
        for name in names {
            index.names.insert(name.to_string(), hash_identity(name));
        }
        index
    }

    fn disk_with(names: &[&str]) -> BTreeSet<IdentityKey> {
        names.iter().map(|n| hash_identity(n)).collect()
    }

    #[test]
    fn test_consistent_state_is_okay() {
        let mut index = index_with(&["alice", "bob"]);
        index
            .aliases
            .insert("ally".to_string(), "alice".to_string());
        let status = check(&index, &disk_with(&["alice", "bob"]));
        assert_eq!(status, IntegrityStatus::Okay);
        assert!(status.into_result().is_ok());
    }

    #[test]
    fn test_empty_is_okay() {
        assert!(check(&MetadataIndex::default(), &BTreeSet::new()).is_okay());
    }

    #[test]
    fn test_missing_record_file() {
        let status = check(&index_with(&["alice", "bob"]), &disk_with(&["alice"]));
        assert_eq!(
            status,
            IntegrityStatus::MissingRecordFile {
                identity: "bob".to_string(),
                key: hash_identity("bob"),
            }
        );
    }

    #[test]
    fn test_name_file_collision() {
        let mut index = index_with(&["alice"]);
        index
            .names
            .insert("mallory".to_string(), hash_identity("alice"));
        let status = check(&index, &disk_with(&["alice"]));
        assert!(matches!(
            status,
            IntegrityStatus::NameFileCollision { ref identity, .. } if identity == "mallory"
        ));
    }

    #[test]
    fn test_alias_to_unknown_identity() {
        let mut index = index_with(&["alice"]);
        index.aliases.insert("ghost".to_string(), "casper".to_string());
        let status = check(&index, &disk_with(&["alice"]));
        assert_eq!(
            status,
            IntegrityStatus::AliasMismatch {
                alias: "ghost".to_string(),
                target: "casper".to_string(),
            }
        );
    }

    #[test]
    fn test_alias_chain_is_rejected() {
        let mut index = index_with(&["alice"]);
        index
            .aliases
            .insert("ally".to_string(), "alice".to_string());
        index.aliases.insert("al".to_string(), "ally".to_string());
        let status = check(&index, &disk_with(&["alice"]));
        assert!(matches!(status, IntegrityStatus::AliasMismatch { ref alias, .. } if alias == "al"));
    }

    #[test]
    fn test_alias_owning_a_record_is_rejected() {
        let mut index = index_with(&["alice", "bob"]);
        index.aliases.insert("bob".to_string(), "alice".to_string());
        let status = check(&index, &disk_with(&["alice", "bob"]));
        assert_eq!(
            status,
            IntegrityStatus::AliasMismatch {
                alias: "bob".to_string(),
                target: "alice".to_string(),
            }
        );
    }

    #[test]
    fn test_extraneous_record_files() {
        let status = check(&index_with(&["alice"]), &disk_with(&["alice", "eve"]));
        assert_eq!(
            status,
            IntegrityStatus::ExtraneousRecordFiles {
                keys: vec![hash_identity("eve")],
            }
        );
        let err = status.into_result().unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
