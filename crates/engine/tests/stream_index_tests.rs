//! Stream discovery through the (StreamType, UpdatedAt) index
//!
//! A manual clock gives every append a distinct, known `UpdatedAt`.

use chrono::{Duration, TimeZone, Utc};
use evstore_core::{NewEvent, StreamId, StreamType, Timestamp};
use evstore_engine::{Database, DatabaseOptions, ManualClock, StreamQuery};
use std::sync::Arc;

fn sid(s: &str) -> StreamId {
    StreamId::new(s).unwrap()
}

fn ty(s: &str) -> StreamType {
    StreamType::new(s).unwrap()
}

fn start() -> Timestamp {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn setup() -> (Arc<Database>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let db = Database::ephemeral_with_options(DatabaseOptions::default().with_clock(clock.clone()));
    (db, clock)
}

fn ids(streams: &[evstore_core::StreamSummary]) -> Vec<String> {
    streams.iter().map(|s| s.stream_id.to_string()).collect()
}

#[test]
fn test_list_streams_most_recent_first() {
    let (db, clock) = setup();
    for name in ["a", "b", "c"] {
        db.append(&sid(name), &ty("Order"), 0, NewEvent::new("E", ""))
            .unwrap();
        clock.advance(Duration::seconds(1));
    }
    db.append(&sid("x"), &ty("Invoice"), 0, NewEvent::new("E", ""))
        .unwrap();

    // Touching "a" moves it to the front
    clock.advance(Duration::seconds(1));
    db.append(&sid("a"), &ty("Order"), 1, NewEvent::new("E", ""))
        .unwrap();

    let listed = db.list_streams_by_type(&ty("Order"), 10).unwrap();
    assert_eq!(ids(&listed), vec!["a", "c", "b"]);
    assert_eq!(listed[0].revision, 2);
    assert_eq!(listed[0].created_at, start());

    let limited = db.list_streams_by_type(&ty("Order"), 2).unwrap();
    assert_eq!(ids(&limited), vec!["a", "c"]);

    assert!(db.list_streams_by_type(&ty("Unknown"), 10).unwrap().is_empty());
}

#[test]
fn test_query_streams_pages_in_update_order() {
    let (db, clock) = setup();
    for i in 0..7 {
        db.append(&sid(&format!("s{}", i)), &ty("Order"), 0, NewEvent::new("E", ""))
            .unwrap();
        clock.advance(Duration::seconds(1));
    }

    let mut seen = Vec::new();
    let mut query = StreamQuery::new().limit(3);
    let mut pages = 0;
    loop {
        let page = db.query_streams(&ty("Order"), query.clone()).unwrap();
        pages += 1;
        seen.extend(ids(&page.streams));
        match page.next_page_key {
            Some(key) => {
                // page keys survive a round trip through their string form
                let key = key.to_string().parse().unwrap();
                query = StreamQuery::new().limit(3).page_key(key);
            }
            None => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, vec!["s0", "s1", "s2", "s3", "s4", "s5", "s6"]);
}

#[test]
fn test_query_streams_updated_after() {
    let (db, clock) = setup();
    for i in 0..5 {
        db.append(&sid(&format!("s{}", i)), &ty("Order"), 0, NewEvent::new("E", ""))
            .unwrap();
        clock.advance(Duration::seconds(10));
    }

    let page = db
        .query_streams(
            &ty("Order"),
            StreamQuery::new().updated_after(start() + Duration::seconds(20)),
        )
        .unwrap();
    assert_eq!(ids(&page.streams), vec!["s2", "s3", "s4"]);
    assert!(!page.has_more());
}

#[test]
fn test_same_timestamp_breaks_ties_by_id() {
    let (db, _clock) = setup();
    for name in ["c", "a", "b"] {
        db.append(&sid(name), &ty("Order"), 0, NewEvent::new("E", ""))
            .unwrap();
    }

    let first = db
        .query_streams(&ty("Order"), StreamQuery::new().limit(2))
        .unwrap();
    assert_eq!(ids(&first.streams), vec!["a", "b"]);
    let key = first.next_page_key.clone().unwrap();
    let second = db
        .query_streams(&ty("Order"), StreamQuery::new().limit(2).page_key(key))
        .unwrap();
    assert_eq!(ids(&second.streams), vec!["c"]);
    assert!(second.next_page_key.is_none());
}
