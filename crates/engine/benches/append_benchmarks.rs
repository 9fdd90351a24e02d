//! Append Performance Benchmarks
//!
//! Measures append throughput for:
//! - Single stream, sequential revisions (ephemeral and durable)
//! - Independent streams appended from several threads
//! - Paged event reads

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evstore_core::{NewEvent, StreamId, StreamType};
use evstore_engine::{Database, EventRange};
use evstore_storage::DurabilityMode;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn order() -> StreamType {
    StreamType::new("Order").unwrap()
}

fn payload() -> NewEvent {
    NewEvent::new("OrderPlaced", br#"{"sku":"A-1","qty":2}"#.to_vec())
}

/// Benchmark: sequential appends to one stream
fn bench_single_stream_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_stream");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ephemeral", |b| {
        let db = Database::ephemeral();
        let id = StreamId::new("bench").unwrap();
        let mut revision = 0u64;
        b.iter(|| {
            let stream = db.append(&id, &order(), revision, payload()).unwrap();
            revision = black_box(stream.revision);
        });
    });

    group.bench_function("durable_buffered", |b| {
        let temp_dir = TempDir::new().unwrap();
        let options = evstore_engine::DatabaseOptions::default()
            .with_durability(DurabilityMode::buffered_default());
        let db = Database::open_with_options(temp_dir.path().join("db"), options).unwrap();
        let id = StreamId::new("bench").unwrap();
        let mut revision = 0u64;
        b.iter(|| {
            let stream = db.append(&id, &order(), revision, payload()).unwrap();
            revision = black_box(stream.revision);
        });
    });

    group.finish();
}

/// Benchmark: independent streams from several threads (no conflicts)
fn bench_multi_threaded_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_threaded_no_conflict");
    const PER_THREAD: u64 = 100;

    for num_threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(num_threads as u64 * PER_THREAD));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let db = Database::ephemeral();
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let db = Arc::clone(&db);
                            thread::spawn(move || {
                                let id = StreamId::new(format!("stream-{}", t)).unwrap();
                                for rev in 0..PER_THREAD {
                                    db.append(&id, &order(), rev, payload()).unwrap();
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: read a full page of events
fn bench_read_page(c: &mut Criterion) {
    let db = Database::ephemeral();
    let id = StreamId::new("bench").unwrap();
    for rev in 0..1_000 {
        db.append(&id, &order(), rev, payload()).unwrap();
    }

    c.bench_function("read_events_page_100", |b| {
        b.iter(|| {
            let page = db
                .read_events(&id, EventRange::all().limit(100))
                .unwrap();
            black_box(page.len());
        });
    });
}

criterion_group!(
    benches,
    bench_single_stream_append,
    bench_multi_threaded_append,
    bench_read_page
);
criterion_main!(benches);
