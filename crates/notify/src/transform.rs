//! Transform stage: project a Head change into a commit notification
//!
//! Pure function of the change record. The event payload is never included.

use crate::notification::CommitNotification;
use evstore_core::{Error, Record, Result};
use evstore_storage::ChangeRecord;

/// Project an accepted Head change into `{StreamId, StreamType, StreamRevision}`
///
/// # Errors
///
/// `Corruption` if the row at the Head position does not hold a Head record.
pub fn project(change: &ChangeRecord) -> Result<CommitNotification> {
    match &change.new_image {
        Record::Head(head) if change.key.is_head() => Ok(CommitNotification {
            stream_id: change.key.stream_id.clone(),
            stream_type: head.stream_type.clone(),
            stream_revision: head.stream_revision,
        }),
        _ => Err(Error::Corruption(format!(
            "change at {}:{} is not a head record",
            change.key.stream_id, change.key.ordinal
        ))),
    }
}
