use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_delivery::messaging::{DeadLetterRecord, Envelope};
use event_delivery::resilience::{RetryConfig, RetryPolicy};
use event_delivery::{DeliveryConfig, DeliveryCore, DeliveryError, InMemoryBroker};
use serde_json::json;
use std::sync::Arc;

fn benchmark_retry_delay(c: &mut Criterion) {
    let policy = RetryPolicy::new(RetryConfig::default());
    c.bench_function("retry_delay_for_attempt", |b| {
        b.iter(|| policy.delay_for_attempt(black_box(4)))
    });
}

fn benchmark_dead_letter_record(c: &mut Criterion) {
    let envelope = Envelope::new("order.created", json!({"order_id": 42, "items": [1, 2, 3]}))
        .with_correlation_id("order-42");
    let error = DeliveryError::transient("order.created", "connection reset");
    c.bench_function("dead_letter_record_to_payload", |b| {
        b.iter(|| {
            DeadLetterRecord::from_failure(black_box(&envelope), &error, 0)
                .to_payload()
                .map(|payload| DeadLetterRecord::from_payload(&payload))
        })
    });
}

fn benchmark_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("benchmark runtime");
    let fallback_dir = tempfile::tempdir().expect("fallback dir");
    let mut config = DeliveryConfig::default();
    config.dead_letter.fallback_dir = fallback_dir.path().to_path_buf();
    let core = DeliveryCore::from_config(&config, Arc::new(InMemoryBroker::new()))
        .expect("delivery core");

    c.bench_function("publish_in_memory", |b| {
        b.iter(|| {
            rt.block_on(core.publisher().publish(
                "order.created",
                json!({"order_id": 42}),
                None,
            ))
        })
    });

    c.bench_function("publish_in_memory_concurrent_16", |b| {
        b.iter(|| {
            rt.block_on(futures::future::join_all((0..16).map(|i| {
                core.publisher()
                    .publish("order.created", json!({"order_id": i}), None)
            })))
        })
    });
}

criterion_group!(
    benches,
    benchmark_retry_delay,
    benchmark_dead_letter_record,
    benchmark_publish
);
criterion_main!(benches);
