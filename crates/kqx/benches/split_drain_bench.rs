//! 🧪 How fast can we split and drain a job out of the in-memory service?
//!
//! Two shapes: one sequential cursor, and a split cursor fanned out over four workers.
//! Same 10k rows, same page size, so the difference is the fork/join overhead.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use kqx::{
    InMemoryQueryService, ParallelConfig, QueryClient, SessionConfig, collect_parallel,
};

const ROWS: u64 = 10_000;

fn config() -> SessionConfig {
    SessionConfig {
        page_size: 250,
        poll_delay_ms: 1,
        ..SessionConfig::default()
    }
}

fn bench_split_drain(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("💀 bench runtime");
    let client = QueryClient::new(Arc::new(InMemoryQueryService::new(ROWS)));

    c.bench_function("sequential_drain_10k", |b| {
        b.to_async(&runtime).iter(|| async {
            let session = client.session("SELECT 1", config()).expect("session");
            let mut cursor = session.cursor().await;
            let mut rows = 0u64;
            while let Some(row) = cursor.next_row().await.expect("row") {
                black_box(row);
                rows += 1;
            }
            assert_eq!(rows, ROWS);
        })
    });

    c.bench_function("split_drain_10k_x4", |b| {
        b.to_async(&runtime).iter(|| async {
            let session = client.session("SELECT 1", config()).expect("session");
            let (rows, report) = collect_parallel(
                session.split_cursor().await,
                ParallelConfig {
                    parallelism: 4,
                    queue_capacity: 1024,
                },
            )
            .await;
            assert_eq!(report.rows, ROWS);
            black_box(rows);
        })
    });
}

criterion_group!(benches, bench_split_drain);
criterion_main!(benches);
