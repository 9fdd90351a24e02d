//! Commit-time condition checks for OCC
//!
//! Rules:
//! - Conditions are checked against current storage, under the commit lock
//! - A row conditioned on absence conflicts if any row exists at its key
//! - A Head conditioned on a revision conflicts if the stored revision
//!   differs or the Head is missing; a Head expected to be missing is
//!   conditioned on absence
//! - Every condition is checked so the result lists all conflicts

use crate::transaction::{Condition, TransactionContext};
use evstore_core::{Error, Record, RecordKey, Result, Storage, StreamId};

/// Types of conflicts that can occur during transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// A row conditioned on absence already exists
    RowExists {
        /// The key that is already taken
        key: RecordKey,
    },

    /// A Head's revision differs from the expected one
    RevisionMismatch {
        /// Stream whose Head moved
        stream_id: StreamId,
        /// Revision the writer expected
        expected: u64,
        /// Revision found in storage
        actual: u64,
    },

    /// A Head conditioned on absence already exists
    StreamExists {
        /// Stream that was created concurrently
        stream_id: StreamId,
        /// Revision of the existing Head
        actual: u64,
    },

    /// A Head conditioned on a revision does not exist
    HeadMissing {
        /// Stream without a Head
        stream_id: StreamId,
        /// Revision the writer expected
        expected: u64,
    },
}

impl ConflictType {
    /// Stream the conflict is on
    pub fn stream_id(&self) -> &StreamId {
        match self {
            ConflictType::RowExists { key } => &key.stream_id,
            ConflictType::RevisionMismatch { stream_id, .. } => stream_id,
            ConflictType::StreamExists { stream_id, .. } => stream_id,
            ConflictType::HeadMissing { stream_id, .. } => stream_id,
        }
    }
}

/// Result of transaction validation
///
/// Accumulates all conflicts found during validation.
/// A transaction commits only if is_valid() returns true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Translate into the public error for the caller
    ///
    /// A missing Head is `StreamNotFound`. Otherwise a conflict on the Head is
    /// preferred since it carries the observed revision. An occupied event
    /// slot implies the Head advanced to at least that ordinal.
    pub fn into_error(self) -> Option<Error> {
        let rank = |c: &&ConflictType| match c {
            ConflictType::HeadMissing { .. } => 0,
            ConflictType::RevisionMismatch { .. } | ConflictType::StreamExists { .. } => 1,
            ConflictType::RowExists { .. } => 2,
        };
        self.conflicts.iter().min_by_key(rank).map(|c| match c {
            ConflictType::HeadMissing { stream_id, .. } => Error::not_found(stream_id),
            ConflictType::RevisionMismatch {
                stream_id,
                expected,
                actual,
            } => Error::conflict(stream_id, *expected, *actual),
            ConflictType::StreamExists { stream_id, actual } => {
                Error::conflict(stream_id, 0, *actual)
            }
            ConflictType::RowExists { key } => {
                let taken = key.ordinal.as_u64();
                Error::conflict(&key.stream_id, taken.saturating_sub(1), taken)
            }
        })
    }
}

/// Current revision of a stream's Head, 0 if the Head does not exist
pub fn head_revision<S: Storage + ?Sized>(store: &S, stream_id: &StreamId) -> Result<u64> {
    match store.get(&RecordKey::head(stream_id.clone()))? {
        None => Ok(0),
        Some(Record::Head(head)) => Ok(head.stream_revision),
        Some(Record::Event(_)) => Err(Error::Corruption(format!(
            "event row stored at head position of stream {}",
            stream_id
        ))),
    }
}

/// Check one condition against current storage state
pub fn validate_condition<S: Storage + ?Sized>(
    condition: &Condition,
    store: &S,
) -> Result<ValidationResult> {
    match condition {
        Condition::NotExists(key) => match store.get(key)? {
            None => Ok(ValidationResult::ok()),
            Some(Record::Head(head)) => Ok(ValidationResult::conflict(ConflictType::StreamExists {
                stream_id: key.stream_id.clone(),
                actual: head.stream_revision,
            })),
            Some(Record::Event(_)) => Ok(ValidationResult::conflict(ConflictType::RowExists {
                key: key.clone(),
            })),
        },
        Condition::HeadRevision {
            stream_id,
            expected,
        } => match store.get(&RecordKey::head(stream_id.clone()))? {
            None => Ok(ValidationResult::conflict(ConflictType::HeadMissing {
                stream_id: stream_id.clone(),
                expected: *expected,
            })),
            Some(Record::Head(head)) if head.stream_revision == *expected => {
                Ok(ValidationResult::ok())
            }
            Some(Record::Head(head)) => {
                Ok(ValidationResult::conflict(ConflictType::RevisionMismatch {
                    stream_id: stream_id.clone(),
                    expected: *expected,
                    actual: head.stream_revision,
                }))
            }
            Some(Record::Event(_)) => Err(Error::Corruption(format!(
                "event row stored at head position of stream {}",
                stream_id
            ))),
        },
    }
}

/// Check every condition a transaction registered
///
/// Storage errors abort validation: a commit must never proceed on a
/// condition that could not be checked.
pub fn validate_transaction<S: Storage + ?Sized>(
    txn: &TransactionContext,
    store: &S,
) -> Result<ValidationResult> {
    let mut result = ValidationResult::ok();
    for condition in txn.conditions() {
        result.merge(validate_condition(condition, store)?);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evstore_core::{HeadRecord, NewEvent, StreamType};
    use evstore_storage::StreamTable;

    fn sid(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    fn seed_stream(store: &StreamTable, id: &StreamId, revision: u64) {
        let now = Utc::now();
        let mut writes = Vec::new();
        for rev in 1..=revision {
            writes.push((
                RecordKey::event(id.clone(), rev),
                Record::Event(NewEvent::new("E", "").into_record(rev, now)),
            ));
        }
        writes.push((
            RecordKey::head(id.clone()),
            Record::Head(HeadRecord {
                stream_type: StreamType::new("Order").unwrap(),
                stream_revision: revision,
                created_at: now,
                updated_at: now,
            }),
        ));
        store.apply_batch(writes).unwrap();
    }

    // === ValidationResult ===

    #[test]
    fn test_validation_result_merge() {
        let mut result = ValidationResult::ok();
        assert!(result.is_valid());
        result.merge(ValidationResult::conflict(ConflictType::RowExists {
            key: RecordKey::event(sid("a"), 1),
        }));
        result.merge(ValidationResult::ok());
        assert!(!result.is_valid());
        assert_eq!(result.conflict_count(), 1);
    }

    #[test]
    fn test_into_error_prefers_revision_mismatch() {
        let mut result = ValidationResult::conflict(ConflictType::RowExists {
            key: RecordKey::event(sid("a"), 4),
        });
        result.merge(ValidationResult::conflict(ConflictType::RevisionMismatch {
            stream_id: sid("a"),
            expected: 3,
            actual: 5,
        }));
        match result.into_error() {
            Some(Error::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(ValidationResult::ok().into_error().is_none());
    }

    // === Conditions ===

    #[test]
    fn test_not_exists() {
        let store = StreamTable::ephemeral();
        let id = sid("a");
        seed_stream(&store, &id, 1);

        let free = Condition::NotExists(RecordKey::event(id.clone(), 2));
        assert!(validate_condition(&free, &store).unwrap().is_valid());

        let taken = Condition::NotExists(RecordKey::event(id.clone(), 1));
        assert!(!validate_condition(&taken, &store).unwrap().is_valid());
    }

    #[test]
    fn test_head_revision_requires_existing_head() {
        let store = StreamTable::ephemeral();
        let id = sid("new");
        assert_eq!(head_revision(&store, &id).unwrap(), 0);

        // Revision 0 means "exists but empty", not "absent"
        let empty = Condition::HeadRevision {
            stream_id: id.clone(),
            expected: 0,
        };
        let result = validate_condition(&empty, &store).unwrap();
        assert_eq!(
            result.conflicts,
            vec![ConflictType::HeadMissing {
                stream_id: sid("new"),
                expected: 0,
            }]
        );
        assert!(result.into_error().unwrap().is_not_found());

        let create = Condition::NotExists(RecordKey::head(id));
        assert!(validate_condition(&create, &store).unwrap().is_valid());
    }

    #[test]
    fn test_empty_head_satisfies_revision_zero() {
        let store = StreamTable::ephemeral();
        let id = sid("empty");
        seed_stream(&store, &id, 0);

        let append = Condition::HeadRevision {
            stream_id: id.clone(),
            expected: 0,
        };
        assert!(validate_condition(&append, &store).unwrap().is_valid());

        // A writer that saw no Head must not overwrite the empty one
        let create = Condition::NotExists(RecordKey::head(id.clone()));
        let result = validate_condition(&create, &store).unwrap();
        assert_eq!(
            result.conflicts,
            vec![ConflictType::StreamExists {
                stream_id: id,
                actual: 0,
            }]
        );
    }

    #[test]
    fn test_head_revision_mismatch() {
        let store = StreamTable::ephemeral();
        let id = sid("a");
        seed_stream(&store, &id, 3);

        let stale = Condition::HeadRevision {
            stream_id: id.clone(),
            expected: 2,
        };
        assert!(!validate_condition(&stale, &store).unwrap().is_valid());

        let current = Condition::HeadRevision {
            stream_id: id,
            expected: 3,
        };
        assert!(validate_condition(&current, &store).unwrap().is_valid());
    }
}
