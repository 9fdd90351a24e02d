//! Append path
//!
//! An append stages two rows in one transaction:
//!
//! ```text
//! (stream_id, expected+1) -> Event   if absent
//! (stream_id, 0)          -> Head    if still at the revision read, or still
//!                                     absent if no Head was read
//! ```
//!
//! The commit manager checks both conditions and applies both rows in one
//! batch, so of N appenders racing with the same expected revision exactly
//! one succeeds and the rest see `ConcurrencyConflict`. A failed commit
//! writes nothing.

use crate::database::Database;
use evstore_core::validation::{validate_stream_id, validate_stream_type};
use evstore_core::{
    Error, HeadRecord, NewEvent, Record, RecordKey, Result, Stream, StreamId, StreamType,
};
use tracing::{debug, warn};

impl Database {
    /// Append one event to a stream under optimistic concurrency control
    ///
    /// `expected_revision` is the caller's view of the stream's current
    /// revision; 0 creates the stream. On success the returned [`Stream`]
    /// carries the new revision (`expected_revision + 1`).
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: malformed id, type or event
    /// - `ConcurrencyConflict`: the head is not at `expected_revision`; re-read
    ///   the head and resubmit
    /// - `StreamNotFound`: `expected_revision > 0` but the stream does not
    ///   exist, or it exists with a different stream type
    /// - `StorageUnavailable`: storage kept failing after bounded retries
    pub fn append(
        &self,
        stream_id: &StreamId,
        stream_type: &StreamType,
        expected_revision: u64,
        event: NewEvent,
    ) -> Result<Stream> {
        self.validate_stream(stream_id, stream_type)?;
        event.validate(self.limits())?;
        let revision = expected_revision
            .checked_add(1)
            .ok_or_else(|| Error::invalid_argument("expected revision out of range"))?;

        let retry = self.options().retry.clone();
        let result = self.transaction_with_retry(&retry, |txn, store| {
            let now = self.now();
            let (created_at, guard) = match txn.get_head(stream_id, store)? {
                Some(head) => {
                    if head.stream_type != *stream_type {
                        return Err(Error::not_found(stream_id));
                    }
                    if head.stream_revision != expected_revision {
                        return Err(Error::conflict(
                            stream_id,
                            expected_revision,
                            head.stream_revision,
                        ));
                    }
                    (head.created_at, Some(head.stream_revision))
                }
                None if expected_revision == 0 => (now, None),
                None => return Err(Error::not_found(stream_id)),
            };

            txn.put_if_absent(
                RecordKey::event(stream_id.clone(), revision),
                Record::Event(event.clone().into_record(revision, now)),
            )?;
            let head = HeadRecord {
                stream_type: stream_type.clone(),
                stream_revision: revision,
                created_at,
                updated_at: now,
            };
            let stream = Stream::from_head(stream_id.clone(), &head);
            txn.put_head(stream_id.clone(), head, guard)?;
            Ok(stream)
        });

        match &result {
            Ok(stream) => debug!(
                target: "evstore::append",
                stream_id = %stream_id,
                stream_type = %stream_type,
                revision = stream.revision,
                event_type = %event.event_type,
                "Event appended"
            ),
            Err(Error::ConcurrencyConflict { actual, .. }) => warn!(
                target: "evstore::append",
                stream_id = %stream_id,
                expected = expected_revision,
                actual = *actual,
                "Append rejected: stale expected revision"
            ),
            Err(e) => debug!(
                target: "evstore::append",
                stream_id = %stream_id,
                error = %e,
                "Append failed"
            ),
        }
        result
    }

    /// Create a stream with a generated id and its first event
    pub fn create_stream(&self, stream_type: &StreamType, event: NewEvent) -> Result<Stream> {
        let stream_id = StreamId::generate();
        self.append(&stream_id, stream_type, 0, event)
    }

    /// Make sure a stream exists, creating an empty one (revision 0) if needed
    ///
    /// Idempotent: an existing stream of the same type is returned as is.
    /// Appending to the new stream uses expected revision 0.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the stream exists with a different type.
    pub fn ensure_stream(&self, stream_id: &StreamId, stream_type: &StreamType) -> Result<Stream> {
        self.validate_stream(stream_id, stream_type)?;

        let check_type = |head: &HeadRecord| -> Result<Stream> {
            if head.stream_type != *stream_type {
                return Err(Error::invalid_argument(format!(
                    "stream {} already exists with type {}",
                    stream_id, head.stream_type
                )));
            }
            Ok(Stream::from_head(stream_id.clone(), head))
        };

        let retry = self.options().retry.clone();
        let result = self.transaction_with_retry(&retry, |txn, store| {
            if let Some(head) = txn.get_head(stream_id, store)? {
                return check_type(&head);
            }
            let now = self.now();
            let head = HeadRecord {
                stream_type: stream_type.clone(),
                stream_revision: 0,
                created_at: now,
                updated_at: now,
            };
            let stream = Stream::from_head(stream_id.clone(), &head);
            txn.put_if_absent(RecordKey::head(stream_id.clone()), Record::Head(head))?;
            Ok(stream)
        });

        match result {
            // Lost a creation race: the winner's head is authoritative
            Err(e) if e.is_conflict() => {
                let stream = self.get_head(stream_id)?;
                if stream.stream_type != *stream_type {
                    return Err(Error::invalid_argument(format!(
                        "stream {} already exists with type {}",
                        stream_id, stream.stream_type
                    )));
                }
                Ok(stream)
            }
            other => other,
        }
    }

    pub(crate) fn validate_stream(
        &self,
        stream_id: &StreamId,
        stream_type: &StreamType,
    ) -> Result<()> {
        validate_stream_id(stream_id.as_str(), self.limits())?;
        validate_stream_type(stream_type.as_str(), self.limits())?;
        Ok(())
    }
}
