//! Property tests: the secondary index agrees with a brute-force model
//!
//! The model keeps the latest Head per stream in a plain map and answers
//! queries by sorting everything; the index must return the same pages.

use chrono::{TimeZone, Utc};
use evstore_core::{
    HeadRecord, IndexCursor, IndexOrder, IndexQuery, StreamId, StreamSummary, StreamType, Timestamp,
};
use evstore_storage::StreamIndex;
use proptest::prelude::*;
use std::collections::HashMap;

const TYPES: [&str; 2] = ["Order", "Invoice"];

fn at(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Debug, Clone)]
struct Upsert {
    stream: u8,
    type_idx: usize,
    updated: i64,
}

fn upsert_strategy() -> impl Strategy<Value = Upsert> {
    (0u8..12, 0usize..2, 0i64..20).prop_map(|(stream, type_idx, updated)| Upsert {
        stream,
        type_idx,
        updated,
    })
}

fn model_query(model: &HashMap<StreamId, HeadRecord>, query: &IndexQuery) -> Vec<StreamSummary> {
    let mut rows: Vec<StreamSummary> = model
        .iter()
        .filter(|(_, h)| h.stream_type == query.stream_type)
        .filter(|(_, h)| query.updated_after.map_or(true, |t| h.updated_at >= t))
        .map(|(id, h)| StreamSummary {
            stream_id: id.clone(),
            stream_type: h.stream_type.clone(),
            revision: h.stream_revision,
            created_at: h.created_at,
            updated_at: h.updated_at,
        })
        .collect();
    rows.sort_by(|a, b| (a.updated_at, &a.stream_id).cmp(&(b.updated_at, &b.stream_id)));
    if query.order == IndexOrder::Descending {
        rows.reverse();
    }
    if let Some(cursor) = &query.start_after {
        let pos = (cursor.updated_at, &cursor.stream_id);
        rows.retain(|r| match query.order {
            IndexOrder::Ascending => (r.updated_at, &r.stream_id) > pos,
            IndexOrder::Descending => (r.updated_at, &r.stream_id) < pos,
        });
    }
    rows.truncate(query.limit);
    rows
}

proptest! {
    #[test]
    fn index_matches_model(
        ops in prop::collection::vec(upsert_strategy(), 1..60),
        limit in 1usize..6,
        after in prop::option::of(0i64..20),
        descending in any::<bool>(),
    ) {
        let mut index = StreamIndex::new();
        let mut model = HashMap::new();
        for (rev, op) in ops.iter().enumerate() {
            let id = StreamId::new(format!("s{}", op.stream)).unwrap();
            let head = HeadRecord {
                stream_type: StreamType::new(TYPES[op.type_idx]).unwrap(),
                stream_revision: rev as u64 + 1,
                created_at: at(0),
                updated_at: at(op.updated),
            };
            index.upsert(&id, &head);
            model.insert(id, head);
        }
        prop_assert_eq!(index.len(), model.len());

        // Walk every page and compare with the model page by page
        for ty in TYPES {
            let mut query = IndexQuery::new(StreamType::new(ty).unwrap(), limit);
            if let Some(a) = after {
                query = query.updated_after(at(a));
            }
            if descending {
                query = query.descending();
            }
            loop {
                let got = index.query(&query);
                let want = model_query(&model, &query);
                prop_assert_eq!(&got, &want);
                match got.last() {
                    Some(last) if got.len() == limit => {
                        query = query.start_after(IndexCursor::from(last));
                    }
                    _ => break,
                }
            }
        }
    }
}
