//! Latency benchmarks for Tidal.
//!
//! These benchmarks drive the subscription lifecycle against the in-memory
//! backend and measure bind, rebind and push-to-store latency.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidal_bench::{row, rows, COLLECTION, OWNER};
use tidal_core::{RecordStore, SubscriptionManager, SyncConfig};
use tidal_transport::{MemoryBackend, Principal};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn manager(backend: &MemoryBackend) -> SubscriptionManager {
    SubscriptionManager::new(
        Arc::new(backend.clone()),
        RecordStore::new(),
        SyncConfig::new(COLLECTION),
    )
}

/// Benchmark a full bind (fetch of 500 rows, then subscribe) and unbind.
fn bench_bind(c: &mut Criterion) {
    let rt = runtime();
    let backend = MemoryBackend::new();
    backend.seed(COLLECTION, rows(500));

    c.bench_function("bind_500_rows", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    let manager = manager(&backend);
                    manager.bind(Principal::from_email(OWNER)).await.unwrap();
                    manager.unbind().await;
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark switching between two principals.
fn bench_rebind(c: &mut Criterion) {
    let rt = runtime();
    let backend = MemoryBackend::new();
    backend.seed(COLLECTION, rows(100));
    let manager = manager(&backend);
    let principals = [
        Principal::from_email(OWNER),
        Principal::from_email("other@tidal.dev"),
    ];

    c.bench_function("rebind", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for i in 0..iters {
                    let principal = principals[(i % 2) as usize].clone();
                    manager.rebind(principal).await.unwrap();
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark the time from a backend insert to the record appearing in the store.
fn bench_push_to_store(c: &mut Criterion) {
    let rt = runtime();
    let backend = MemoryBackend::new();
    let manager = manager(&backend);
    rt.block_on(manager.bind(Principal::from_email(OWNER))).unwrap();
    let mut store = manager.store().subscribe();
    let mut next = 0u64;

    c.bench_function("push_to_store", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    next += 1;
                    store.mark_unchanged();
                    let start = Instant::now();
                    backend.insert(COLLECTION, row(next));
                    store.changed().await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        });
    });
}

criterion_group!(benches, bench_bind, bench_rebind, bench_push_to_store);
criterion_main!(benches);
