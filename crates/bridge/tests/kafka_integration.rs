//! Integration tests against a real Kafka cluster
//!
//! These tests require a running Kafka instance with transactions enabled.
//! To run these tests:
//!
//! 1. Start Kafka:
//!    ```bash
//!    docker run -d --name kafka -p 9092:9092 apache/kafka:latest
//!    ```
//!
//! 2. Run tests:
//!    ```bash
//!    cargo test --test kafka_integration -- --ignored --nocapture
//!    ```

use eos_bridge::kafka::{
    AdminConfig, AdminGateway, ConsumerConfig, ConsumerSession, ProducerConfig, RdKafkaAdmin,
    RdKafkaConsumer, RdKafkaProducer, TransactionTimeouts, TransactionalProducerSession,
};
use eos_bridge::{CycleOutcome, ExactlyOnceBridge, LoggingStatusSink};
use eos_bridge_types::{OutputRecord, TopicSpec};
use std::sync::Arc;
use std::time::Duration;

const BROKERS: &str = "localhost:9092";

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

fn admin() -> AdminGateway<RdKafkaAdmin> {
    let config = AdminConfig::new(vec![BROKERS.to_string()]);
    AdminGateway::new(RdKafkaAdmin::new(config).expect("Failed to create admin client"))
}

fn producer_config(transactional_id: &str) -> ProducerConfig {
    ProducerConfig::builder()
        .bootstrap_servers(vec![BROKERS.to_string()])
        .transactional_id(transactional_id.to_string())
        .build()
        .expect("Failed to build producer config")
}

fn consumer_config(group_id: &str) -> ConsumerConfig {
    ConsumerConfig::builder()
        .bootstrap_servers(vec![BROKERS.to_string()])
        .group_id(group_id.to_string())
        .auto_offset_reset("earliest".to_string())
        .build()
        .expect("Failed to build consumer config")
}

fn bridge(group_id: &str, transactional_id: &str) -> ExactlyOnceBridge<RdKafkaConsumer, RdKafkaProducer> {
    let consumer = RdKafkaConsumer::new(&consumer_config(group_id)).expect("Failed to create consumer");
    let config = producer_config(transactional_id);
    let producer = RdKafkaProducer::new(&config).expect("Failed to create producer");
    ExactlyOnceBridge::new(
        ConsumerSession::new(consumer, group_id),
        TransactionalProducerSession::new(producer, transactional_id, TransactionTimeouts::from(&config)),
        Arc::new(LoggingStatusSink),
    )
}

#[tokio::test]
#[ignore] // Requires Kafka running
async fn test_ensure_topic_creates_and_grows() {
    let gateway = admin();
    let topic = unique("eos-ensure");

    gateway.ensure_topic(&TopicSpec::new(&topic, 1)).await.unwrap();
    gateway.ensure_topic(&TopicSpec::new(&topic, 3)).await.unwrap();

    let described = gateway.describe_topics(&[topic.clone()]).await.unwrap();
    assert_eq!(described[0].as_ref().unwrap().partition_count, 3);

    gateway.delete_topics(&[topic]).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Kafka running
async fn test_delete_missing_topic_and_group() {
    let gateway = admin();

    gateway.delete_topics(&[unique("eos-missing")]).await.unwrap();
    gateway
        .delete_consumer_groups(&[unique("eos-missing-group")])
        .await
        .unwrap();
}

#[tokio::test]
#[ignore] // Requires Kafka running
async fn test_publish_commits_records() {
    let gateway = admin();
    let output = unique("eos-publish");
    gateway.ensure_topic(&TopicSpec::new(&output, 1)).await.unwrap();

    let mut bridge = bridge(&unique("eos-group"), &unique("eos-txn"));
    bridge.init().await.unwrap();

    let outcome = bridge
        .publish(&[
            OutputRecord::new(&output, "one").with_key("k"),
            OutputRecord::new(&output, "two").with_key("k"),
        ])
        .await;
    assert!(outcome.is_committed(), "unexpected outcome {:?}", outcome);

    bridge.close().await.unwrap();
    gateway.delete_topics(&[output]).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Kafka running
async fn test_read_process_write_cycle() {
    let gateway = admin();
    let input = unique("eos-in");
    let output = unique("eos-out");
    let group = unique("eos-group");
    gateway.ensure_topic(&TopicSpec::new(&input, 1)).await.unwrap();
    gateway.ensure_topic(&TopicSpec::new(&output, 1)).await.unwrap();

    // Seed the input through a publish-only bridge.
    let mut seeder = bridge(&unique("eos-seed"), &unique("eos-seed-txn"));
    seeder.init().await.unwrap();
    let seeded: Vec<_> = (0..3)
        .map(|i| OutputRecord::new(&input, format!("event-{}", i)))
        .collect();
    assert!(seeder.publish(&seeded).await.is_committed());
    seeder.close().await.unwrap();

    let mut bridge = bridge(&group, &unique("eos-txn"));
    bridge.init().await.unwrap();
    bridge.consumer().subscribe(&[input.clone()]).unwrap();

    let mut batch = Vec::new();
    for _ in 0..100 {
        if let Some(message) = bridge.consumer().poll(Duration::from_millis(200)).await.unwrap() {
            batch.push(OutputRecord::new(&output, message.payload.unwrap_or_default()));
            if batch.len() == 3 {
                break;
            }
        }
    }
    assert_eq!(batch.len(), 3);

    match bridge.run_cycle(&batch).await {
        CycleOutcome::Committed(report) => {
            assert_eq!(report.records, 3);
            assert_eq!(report.offsets.values().copied().max(), Some(3));
        }
        other => panic!("expected commit, got {:?}", other),
    }

    bridge.close().await.unwrap();
    gateway.delete_topics(&[input, output]).await.unwrap();
    gateway.delete_consumer_groups(&[group]).await.unwrap();
}
