//! Read path
//!
//! - `get_head`: authoritative stream position from the Head record
//! - `read_events` / `read_all_events`: paginated range scans from ordinal 1
//! - `list_streams_by_type` / `query_streams`: discovery through the
//!   `(StreamType, UpdatedAt)` index, which may lag behind Head records
//!
//! Event records are immutable once written and never exceed the head
//! revision, so a range read after a head read is consistent with it.

use crate::database::Database;
use crate::page::{EventPage, EventRange, PageKey, StreamPage, StreamQuery};
use evstore_core::validation::validate_stream_type;
use evstore_core::{
    Error, Event, IndexQuery, Ordinal, Record, RecordKey, Result, Stream, StreamId,
    StreamSummary, StreamType,
};
use tracing::debug;

impl Database {
    /// Current position of a stream
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream was never created.
    pub fn get_head(&self, stream_id: &StreamId) -> Result<Stream> {
        self.read_with_retry("get_head", |store| {
            match store.get(&RecordKey::head(stream_id.clone()))? {
                Some(Record::Head(head)) => Ok(Stream::from_head(stream_id.clone(), &head)),
                Some(Record::Event(_)) => Err(Error::Corruption(format!(
                    "event row stored at head position of stream {}",
                    stream_id
                ))),
                None => Err(Error::not_found(stream_id)),
            }
        })
    }

    /// Read one page of a stream's events in revision order
    ///
    /// `from` defaults to 1 and `to` to the head revision at call time; `to`
    /// beyond the head is clamped. An empty range or an empty stream yields an
    /// empty page.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: `from` is 0 (the Head position)
    /// - `StreamNotFound`: the stream does not exist
    pub fn read_events(&self, stream_id: &StreamId, range: EventRange) -> Result<EventPage> {
        let from = range.from.unwrap_or(1);
        if from == 0 {
            return Err(Error::invalid_argument(
                "event revisions start at 1; ordinal 0 is the stream head",
            ));
        }
        let limit = self
            .limits()
            .clamp_page_size(range.limit.unwrap_or(self.options().page_size));

        let head = self.get_head(stream_id)?;
        let to = range.to.map_or(head.revision, |to| to.min(head.revision));
        if from > to {
            return Ok(EventPage::default());
        }

        let rows = self.read_with_retry("read_events", |store| {
            store.scan_stream(stream_id, Ordinal::event(from), Ordinal::event(to), limit)
        })?;

        let mut events = Vec::with_capacity(rows.len());
        for (key, record) in rows {
            match record {
                Record::Event(event) => events.push(Event::from_record(stream_id.clone(), event)),
                Record::Head(_) => {
                    return Err(Error::Corruption(format!(
                        "head row stored at ordinal {} of stream {}",
                        key.ordinal, stream_id
                    )))
                }
            }
        }

        let last_evaluated_revision = events.last().map(|e| e.revision);
        let has_more = last_evaluated_revision.is_some_and(|last| last < to);
        debug!(
            target: "evstore::read",
            stream_id = %stream_id,
            from,
            to,
            count = events.len(),
            has_more,
            "Read events"
        );
        Ok(EventPage {
            events,
            has_more,
            last_evaluated_revision,
        })
    }

    /// Read every event of a stream, following pages to the end
    ///
    /// The end is pinned to the head revision seen by the first page, so
    /// events appended while paging are not included.
    pub fn read_all_events(&self, stream_id: &StreamId) -> Result<Vec<Event>> {
        let to = self.get_head(stream_id)?.revision;
        let mut events = Vec::new();
        let mut from = 1;
        while from <= to {
            let page = self.read_events(stream_id, EventRange::between(from, to))?;
            let next = page.next_from();
            events.extend(page.events);
            match next {
                Some(next) => from = next,
                None => break,
            }
        }
        Ok(events)
    }

    /// Most recently updated streams of a type, newest first
    ///
    /// Served from the secondary index: revisions may be stale under
    /// concurrent writes. Use [`Database::get_head`] for an authoritative
    /// position.
    pub fn list_streams_by_type(
        &self,
        stream_type: &StreamType,
        limit: usize,
    ) -> Result<Vec<StreamSummary>> {
        validate_stream_type(stream_type.as_str(), self.limits())?;
        let limit = self.limits().clamp_page_size(limit);
        let query = IndexQuery::new(stream_type.clone(), limit).descending();
        let streams = self.read_with_retry("list_streams_by_type", |store| {
            store.query_index(&query)
        })?;
        debug!(
            target: "evstore::read",
            stream_type = %stream_type,
            count = streams.len(),
            "Listed streams by type"
        );
        Ok(streams)
    }

    /// Page through the streams of a type in ascending `UpdatedAt` order
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the page key belongs to another stream type.
    pub fn query_streams(&self, stream_type: &StreamType, query: StreamQuery) -> Result<StreamPage> {
        validate_stream_type(stream_type.as_str(), self.limits())?;
        let limit = self
            .limits()
            .clamp_page_size(query.limit.unwrap_or(self.options().page_size));

        // One extra entry tells whether another page follows
        let mut index_query = IndexQuery::new(stream_type.clone(), limit + 1);
        if let Some(ts) = query.updated_after {
            index_query = index_query.updated_after(ts);
        }
        if let Some(key) = &query.page_key {
            if key.stream_type != *stream_type {
                return Err(Error::invalid_argument(format!(
                    "page key for stream type {} used to query {}",
                    key.stream_type, stream_type
                )));
            }
            index_query = index_query.start_after(key.cursor());
        }

        let mut streams = self.read_with_retry("query_streams", |store| {
            store.query_index(&index_query)
        })?;
        let next_page_key = if streams.len() > limit {
            streams.truncate(limit);
            streams.last().map(PageKey::after)
        } else {
            None
        };

        Ok(StreamPage {
            streams,
            next_page_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{Database, DatabaseOptions};
    use crate::page::{EventRange, StreamQuery};
    use evstore_core::{Error, Limits, NewEvent, StreamId, StreamType};
    use std::sync::Arc;

    fn sid(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    fn order() -> StreamType {
        StreamType::new("Order").unwrap()
    }

    fn seeded(revisions: u64) -> (Arc<Database>, StreamId) {
        let db = Database::ephemeral_with_options(
            DatabaseOptions::default().with_limits(Limits::with_small_limits()),
        );
        let id = sid("order-1");
        for rev in 0..revisions {
            db.append(&id, &order(), rev, NewEvent::new("E", rev.to_string()))
                .unwrap();
        }
        (db, id)
    }

    #[test]
    fn test_get_head_missing() {
        let db = Database::ephemeral();
        assert!(db.get_head(&sid("ghost")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_events_pages_are_bounded() {
        // small limits cap pages at 4
        let (db, id) = seeded(10);

        let page = db.read_events(&id, EventRange::all()).unwrap();
        assert_eq!(page.len(), 4);
        assert!(page.has_more);
        assert_eq!(page.last_evaluated_revision, Some(4));
        assert_eq!(page.next_from(), Some(5));

        let last = db
            .read_events(&id, EventRange::all().from_revision(9))
            .unwrap();
        assert_eq!(last.len(), 2);
        assert!(!last.has_more);
        assert_eq!(last.next_from(), None);
    }

    #[test]
    fn test_read_events_clamps_to_head() {
        let (db, id) = seeded(3);
        let page = db.read_events(&id, EventRange::between(2, 100)).unwrap();
        let revisions: Vec<u64> = page.events.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![2, 3]);
        assert!(!page.has_more);
    }

    #[test]
    fn test_read_events_empty_ranges() {
        let (db, id) = seeded(3);
        assert!(db.read_events(&id, EventRange::between(3, 2)).unwrap().is_empty());
        assert!(db.read_events(&id, EventRange::all().from_revision(4)).unwrap().is_empty());
    }

    #[test]
    fn test_read_events_rejects_head_ordinal() {
        let (db, id) = seeded(1);
        let err = db
            .read_events(&id, EventRange::all().from_revision(0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_read_all_events_follows_pages() {
        let (db, id) = seeded(10);
        let events = db.read_all_events(&id).unwrap();
        let payloads: Vec<String> = events
            .iter()
            .map(|e| String::from_utf8(e.payload.clone()).unwrap())
            .collect();
        assert_eq!(payloads, (0..10).map(|r: u64| r.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_page_key_from_other_type_rejected() {
        let (db, _) = seeded(1);
        let page = db
            .query_streams(&order(), StreamQuery::new().limit(1))
            .unwrap();
        assert!(!page.has_more());

        let key: crate::page::PageKey = "order-1|Invoice|2023-11-14T22:13:20Z".parse().unwrap();
        let err = db
            .query_streams(&order(), StreamQuery::new().page_key(key))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
