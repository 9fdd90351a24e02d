//! Filter stage: keep only Head record changes
//!
//! An append writes an Event row and the Head row in one batch, so the feed
//! carries two changes per append. The Head row is identified by its ordinal
//! (0); only that change becomes a notification candidate.

use evstore_storage::ChangeRecord;

/// True if the change wrote a stream's Head record
pub fn is_head_change(change: &ChangeRecord) -> bool {
    change.key.is_head()
}

/// True if the change is a Head write that advanced the stream
///
/// A Head at revision 0 (a stream created without events) is not an advance.
pub fn accepts(change: &ChangeRecord) -> bool {
    is_head_change(change)
        && change
            .new_image
            .as_head()
            .map_or(true, |head| head.stream_revision > 0)
}
