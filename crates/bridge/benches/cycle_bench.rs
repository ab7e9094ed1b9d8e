//! Benchmarks for transactional cycles over the in-memory broker
//!
//! Run with: cargo bench --bench cycle_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eos_bridge::testing::InMemoryBroker;
use eos_bridge::{LoggingStatusSink, PassthroughTransform, RecordTransform};
use eos_bridge_types::{ConsumedMessage, OutputRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

fn records(count: usize) -> Vec<OutputRecord> {
    (0..count)
        .map(|i| {
            OutputRecord::new("bench-out", vec![0u8; 256])
                .with_key(format!("key-{}", i % 16))
                .with_header("trace-id", format!("{:08}", i))
        })
        .collect()
}

fn messages(count: usize) -> Vec<ConsumedMessage> {
    (0..count)
        .map(|i| ConsumedMessage {
            topic: "bench-in".to_string(),
            partition: (i % 4) as i32,
            offset: i as i64,
            key: Some(format!("key-{}", i).into_bytes()),
            payload: Some(vec![0u8; 256]),
            headers: HashMap::new(),
            timestamp: None,
        })
        .collect()
}

fn benchmark_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.sample_size(20);

    for size in [1, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("records", size), size, |b, &size| {
            let rt = Runtime::new().unwrap();
            let broker = InMemoryBroker::new();
            broker.create_topic("bench-out", 8);
            let bridge = rt.block_on(async {
                let mut bridge = broker
                    .bridge("bench-group", "bench-txn", &[], Arc::new(LoggingStatusSink))
                    .unwrap();
                bridge.init().await.unwrap();
                bridge
            });
            let bridge = Arc::new(Mutex::new(bridge));
            let batch = Arc::new(records(size));

            b.to_async(&rt).iter(|| {
                let bridge = Arc::clone(&bridge);
                let batch = Arc::clone(&batch);
                async move {
                    let outcome = bridge.lock().await.publish(&batch).await;
                    black_box(outcome);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_passthrough(c: &mut Criterion) {
    let mut group = c.benchmark_group("passthrough_transform");

    for size in [100, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        let input = messages(*size);

        group.bench_with_input(BenchmarkId::new("messages", size), size, |b, _| {
            let rt = Runtime::new().unwrap();
            let transform = PassthroughTransform::new("bench-out");
            b.to_async(&rt).iter(|| async {
                let _ = black_box(transform.transform(&input).await);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_publish, benchmark_passthrough);
criterion_main!(benches);
