use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use idempotent_orders::idempotency::{
    CachedResponse, IdempotencyHandler, IdempotencyKeyGenerator, IdempotencyPolicy,
    IdempotencyStore, InMemoryIdempotencyStore, ReserveOutcome,
};

fn benchmark_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generator");
    let generator = IdempotencyKeyGenerator::with_default_config();

    group.bench_function("composite", |b| {
        b.iter(|| generator.composite(black_box("client-a"), black_box("order-2024-0001")))
    });

    let key = generator.composite("client-a", "order-2024-0001").unwrap();
    group.bench_function("storage_key", |b| b.iter(|| generator.storage_key(black_box(&key))));

    for size in [64usize, 1024, 16 * 1024] {
        let body = vec![b'x'; size];
        group.bench_with_input(BenchmarkId::new("request_fingerprint", size), &body, |b, body| {
            b.iter(|| generator.request_fingerprint("POST", "/api/orders", black_box(body)))
        });
    }

    group.finish();
}

fn benchmark_store_hot_path(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("in_memory_store");
    let generator = IdempotencyKeyGenerator::with_default_config();
    let payload = CachedResponse::new(201, Some("application/json".into()), b"{\"orderId\":7}".to_vec());

    group.bench_function("reserve_complete", |b| {
        let store = InMemoryIdempotencyStore::new();
        let mut n = 0u64;
        b.to_async(&runtime).iter(|| {
            n += 1;
            let key = generator.composite("bench", &n.to_string()).unwrap();
            let store = &store;
            let payload = payload.clone();
            async move {
                if let ReserveOutcome::Reserved(reservation) =
                    store.try_reserve(&key, Duration::from_secs(60), None).await.unwrap()
                {
                    store
                        .complete(&reservation, payload, Duration::from_secs(3600))
                        .await
                        .unwrap();
                }
            }
        });
    });

    group.bench_function("duplicate_lookup", |b| {
        let store = InMemoryIdempotencyStore::new();
        let key = generator.composite("bench", "dup").unwrap();
        runtime.block_on(async {
            if let ReserveOutcome::Reserved(reservation) =
                store.try_reserve(&key, Duration::from_secs(60), None).await.unwrap()
            {
                store
                    .complete(&reservation, payload.clone(), Duration::from_secs(3600))
                    .await
                    .unwrap();
            }
        });

        b.to_async(&runtime).iter(|| async {
            black_box(store.try_reserve(&key, Duration::from_secs(60), None).await.unwrap())
        });
    });

    group.finish();
}

fn benchmark_handler_replay(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handler = IdempotencyHandler::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        IdempotencyKeyGenerator::with_default_config(),
    );
    let policy = IdempotencyPolicy::default();
    let key = handler.composite_key("bench", "replay").unwrap();

    runtime.block_on(async {
        handler
            .execute(&key, &policy, None, || async {
                Ok(CachedResponse::new(201, None, b"first".to_vec()))
            })
            .await
            .unwrap();
    });

    c.bench_function("handler_execute_replay", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                handler
                    .execute(&key, &policy, None, || async {
                        Ok(CachedResponse::new(201, None, Vec::new()))
                    })
                    .await
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    benchmark_key_generation,
    benchmark_store_hot_path,
    benchmark_handler_replay
);
criterion_main!(benches);
