//! Tests for the Kafka sessions and the admin gateway
//!
//! Note: These run against the in-memory broker and don't require a running
//! Kafka cluster. Real-broker tests live in `tests/kafka_integration.rs`.

use super::*;
use crate::testing::{InMemoryAdmin, InMemoryBroker, InMemoryProducer};
use async_trait::async_trait;
use eos_bridge_types::{
    AbortOutcome, OutputRecord, TopicPartition, TopicSpec, TransactionState,
};
use std::collections::BTreeSet;
use std::time::Duration;

fn session(broker: &InMemoryBroker, id: &str) -> TransactionalProducerSession<InMemoryProducer> {
    TransactionalProducerSession::new(broker.producer(id), id, TransactionTimeouts::default())
}

fn records(topic: &str, count: usize) -> Vec<OutputRecord> {
    (0..count)
        .map(|i| OutputRecord::new(topic, format!("value-{}", i)))
        .collect()
}

// ---- admin gateway ----

#[tokio::test]
async fn test_ensure_topic_creates_with_policy_replication() {
    for (brokers, expected_rf) in [(1, 1), (2, 1), (3, 2), (4, 2), (5, 3), (9, 3)] {
        let broker = InMemoryBroker::with_brokers(brokers);
        let gateway = AdminGateway::new(broker.admin());

        gateway
            .ensure_topic(&TopicSpec::new("metrics", 4).with_retention(86_400_000, -1))
            .await
            .unwrap();

        assert_eq!(broker.partition_count("metrics"), Some(4));
        assert_eq!(broker.replication_factor("metrics"), Some(expected_rf));
        assert_eq!(broker.retention("metrics"), Some((86_400_000, -1)));
    }
}

#[tokio::test]
async fn test_ensure_topic_grows_but_never_shrinks() {
    let broker = InMemoryBroker::new();
    let gateway = AdminGateway::new(broker.admin());

    gateway.ensure_topic(&TopicSpec::new("metrics", 2)).await.unwrap();
    gateway.ensure_topic(&TopicSpec::new("metrics", 6)).await.unwrap();
    assert_eq!(broker.partition_count("metrics"), Some(6));

    gateway.ensure_topic(&TopicSpec::new("metrics", 3)).await.unwrap();
    assert_eq!(broker.partition_count("metrics"), Some(6));
}

#[tokio::test]
async fn test_ensure_topic_is_idempotent() {
    let broker = InMemoryBroker::new();
    let gateway = AdminGateway::new(broker.admin());
    let spec = TopicSpec::new("metrics", 3);

    gateway.ensure_topic(&spec).await.unwrap();
    gateway.ensure_topic(&spec).await.unwrap();
    assert_eq!(broker.partition_count("metrics"), Some(3));
}

#[tokio::test]
async fn test_ensure_topic_rejects_invalid_spec() {
    let broker = InMemoryBroker::new();
    let gateway = AdminGateway::new(broker.admin());

    let err = gateway
        .ensure_topic(&TopicSpec::new("metrics", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, KafkaError::InvalidConfiguration { .. }));
    assert_eq!(broker.partition_count("metrics"), None);
}

#[tokio::test]
async fn test_ensure_topic_with_no_brokers_fails() {
    let broker = InMemoryBroker::with_brokers(0);
    let gateway = AdminGateway::new(broker.admin());

    let err = gateway
        .ensure_topic(&TopicSpec::new("metrics", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, KafkaError::InvalidMetadata { .. }));
    assert_eq!(broker.partition_count("metrics"), None);
}

/// Reports no topics, as if another client created them after the metadata fetch.
struct StaleMetadataAdmin(InMemoryAdmin);

#[async_trait]
impl AdminBackend for StaleMetadataAdmin {
    async fn cluster_metadata(&self) -> Result<ClusterMetadata> {
        let mut metadata = self.0.cluster_metadata().await?;
        metadata.topics.clear();
        Ok(metadata)
    }

    async fn create_topic(&self, spec: &TopicSpec, replication_factor: i32) -> Result<()> {
        self.0.create_topic(spec, replication_factor).await
    }

    async fn create_partitions(&self, topic: &str, total: usize) -> Result<()> {
        self.0.create_partitions(topic, total).await
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<Vec<DeletionResult>> {
        self.0.delete_topics(topics).await
    }

    async fn delete_groups(&self, groups: &[String]) -> Result<Vec<DeletionResult>> {
        self.0.delete_groups(groups).await
    }
}

#[tokio::test]
async fn test_ensure_topic_tolerates_concurrent_creation() {
    let broker = InMemoryBroker::new();
    broker.create_topic("metrics", 2);
    let gateway = AdminGateway::new(StaleMetadataAdmin(broker.admin()));

    gateway.ensure_topic(&TopicSpec::new("metrics", 2)).await.unwrap();
    assert_eq!(broker.partition_count("metrics"), Some(2));
}

#[tokio::test]
async fn test_describe_topics_reports_each_name() {
    let broker = InMemoryBroker::new();
    broker.create_topic("a", 3);
    let gateway = AdminGateway::new(broker.admin());

    let described = gateway
        .describe_topics(&["a".to_string(), "missing".to_string()])
        .await
        .unwrap();

    assert_eq!(described.len(), 2);
    assert_eq!(described[0].as_ref().unwrap().partition_count, 3);
    assert!(matches!(described[1], Err(KafkaError::TopicNotFound { .. })));
}

#[tokio::test]
async fn test_delete_missing_topics_and_groups_succeeds() {
    let broker = InMemoryBroker::new();
    broker.create_topic("a", 1);
    let consumer = broker.consumer("g1");
    consumer.subscribe(&["a".to_string()]).unwrap();
    let gateway = AdminGateway::new(broker.admin());

    gateway
        .delete_topics(&["a".to_string(), "never-existed".to_string()])
        .await
        .unwrap();
    gateway
        .delete_consumer_groups(&["g1".to_string(), "ghost".to_string()])
        .await
        .unwrap();

    assert_eq!(broker.partition_count("a"), None);
    assert!(!broker.has_group("g1"));

    // Deleting again is still a success.
    gateway.delete_topics(&["a".to_string()]).await.unwrap();
}

// ---- producer session ----

#[tokio::test]
async fn test_begin_requires_init() {
    let broker = InMemoryBroker::new();
    let mut producer = session(&broker, "p1");

    let err = producer.begin().await.unwrap_err();
    assert!(matches!(err, KafkaError::InvalidTransactionState { .. }));

    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    assert_eq!(producer.state(), TransactionState::Begun);

    let err = producer.init_transactions().await.unwrap_err();
    assert!(matches!(err, KafkaError::InvalidTransactionState { .. }));
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_produce_and_commit_makes_records_visible() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 2);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();

    producer.begin().await.unwrap();
    assert_eq!(producer.produce_batch(&records("out", 5)).await.unwrap(), 5);
    producer.flush().await.unwrap();
    assert!(broker.read_committed("out").is_empty());

    producer.commit().await.unwrap();
    assert_eq!(producer.state(), TransactionState::Idle);
    assert_eq!(broker.read_committed("out").len(), 5);

    let stats = producer.stats();
    assert_eq!(stats.transactions_committed, 1);
    assert_eq!(stats.records_produced, 5);
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_produce_empty_batch_is_noop() {
    let broker = InMemoryBroker::new();
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();

    assert_eq!(producer.produce_batch(&[]).await.unwrap(), 0);
    assert_eq!(producer.state(), TransactionState::Begun);
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_produce_outside_transaction_is_rejected() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();

    let err = producer
        .produce_batch(&records("out", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, KafkaError::InvalidTransactionState { .. }));
    assert!(broker.read_uncommitted("out").is_empty());
}

#[tokio::test]
async fn test_delivery_failure_drains_then_requires_abort() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();

    broker.fail_delivery_at(1);
    let err = producer
        .produce_batch(&records("out", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, KafkaError::Delivery { .. }));
    assert_eq!(producer.state(), TransactionState::AbortRequired);
    assert_eq!(producer.stats().delivery_failures, 1);

    let outcome = producer.handle_failure(&err).await.unwrap();
    assert_eq!(outcome, AbortOutcome::Aborted);
    assert_eq!(producer.state(), TransactionState::Idle);
    assert!(broker.read_committed("out").is_empty());
    assert!(!broker.transaction_open("p1"));
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_topic_fails_delivery() {
    let broker = InMemoryBroker::new();
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();

    let err = producer
        .produce_batch(&records("missing", 1))
        .await
        .unwrap_err();
    assert!(err.requires_abort());
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_delivery_channel_is_fatal() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();

    broker.close_delivery_channel_at(2);
    let err = producer
        .produce_batch(&records("out", 3))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KafkaError::DeliveryChannelClosed {
            expected: 3,
            received: 2
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(producer.state(), TransactionState::AbortRequired);
    assert_eq!(producer.handle_failure(&err).await.unwrap(), AbortOutcome::Aborted);
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_abort_without_transaction_counts_as_success() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    producer.produce_batch(&records("out", 1)).await.unwrap();

    broker.abort_finds_no_transaction();
    let outcome = producer.abort().await.unwrap();
    assert_eq!(outcome, AbortOutcome::NoTransactionInProgress);
    assert_eq!(producer.state(), TransactionState::Idle);

    // The session is usable again.
    producer.begin().await.unwrap();
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_abort_is_retried_by_next_begin() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    producer.produce_batch(&records("out", 2)).await.unwrap();

    broker.fail_commit(ErrorClass::AbortRequired);
    let err = producer.commit().await.unwrap_err();
    broker.fail_abort(ErrorClass::Transient);
    assert!(producer.handle_failure(&err).await.is_err());
    assert_eq!(producer.state(), TransactionState::AbortRequired);
    assert!(broker.transaction_open("p1"));

    producer.begin().await.unwrap();
    assert_eq!(producer.state(), TransactionState::Begun);
    assert_eq!(producer.stats().transactions_aborted, 1);
    assert!(broker.read_committed("out").is_empty());

    producer.produce_batch(&records("out", 1)).await.unwrap();
    producer.commit().await.unwrap();
    assert_eq!(broker.read_committed("out").len(), 1);
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_pending_abort_is_retried_whatever_the_error() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();

    broker.fail_abort(ErrorClass::Transient);
    assert!(producer.abort().await.is_err());
    assert_eq!(producer.state(), TransactionState::AbortRequired);

    // An error that alone would not call for an abort still resolves the pending one.
    let unrelated = KafkaError::invalid_state("produce_batch", "no usable transaction");
    assert!(!unrelated.requires_abort());
    assert_eq!(
        producer.handle_failure(&unrelated).await.unwrap(),
        AbortOutcome::Aborted
    );
    assert_eq!(producer.state(), TransactionState::Idle);
    assert!(!broker.transaction_open("p1"));
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_handle_failure_without_open_transaction() {
    let broker = InMemoryBroker::new();
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();

    let err = KafkaError::timeout("fetch metadata", 1_000);
    assert_eq!(
        producer.handle_failure(&err).await.unwrap(),
        AbortOutcome::NotAttempted
    );
}

#[tokio::test]
async fn test_fenced_commit_skips_abort() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    producer.produce_batch(&records("out", 2)).await.unwrap();

    broker.fail_commit(ErrorClass::Fatal);
    let err = producer.commit().await.unwrap_err();
    assert!(err.is_producer_fatal());
    assert!(producer.is_failed());

    assert_eq!(
        producer.handle_failure(&err).await.unwrap(),
        AbortOutcome::NotAttempted
    );
    let err = producer.begin().await.unwrap_err();
    assert!(err.is_producer_fatal());
}

#[tokio::test]
async fn test_retriable_commit_failure_is_aborted() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    producer.produce_batch(&records("out", 2)).await.unwrap();

    broker.fail_commit(ErrorClass::Transient);
    let err = producer.commit().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(producer.handle_failure(&err).await.unwrap(), AbortOutcome::Aborted);
    assert!(broker.read_committed("out").is_empty());
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_fatal_client_event_stops_new_transactions() {
    let broker = InMemoryBroker::new();
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();

    assert!(broker.emit_client_event(
        "p1",
        ClientEvent {
            code: None,
            message: "broker transport failure".to_string(),
            fatal: false,
        },
    ));
    assert!(broker.emit_client_event(
        "p1",
        ClientEvent {
            code: None,
            message: "producer fenced".to_string(),
            fatal: true,
        },
    ));

    for _ in 0..100 {
        if producer.is_failed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(producer.is_failed());
    assert_eq!(producer.stats().client_errors, 2);

    let err = producer.begin().await.unwrap_err();
    assert!(err.is_producer_fatal());
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_close_aborts_open_transaction_and_stops_listener() {
    let broker = InMemoryBroker::new();
    broker.create_topic("out", 1);
    let mut producer = session(&broker, "p1");
    producer.init_transactions().await.unwrap();
    producer.begin().await.unwrap();
    producer.produce_batch(&records("out", 3)).await.unwrap();

    producer.close().await.unwrap();

    assert!(!broker.transaction_open("p1"));
    assert!(broker.read_committed("out").is_empty());
    assert_eq!(producer.stats().transactions_aborted, 1);
    // The listener dropped its receiver.
    assert!(!broker.emit_client_event(
        "p1",
        ClientEvent {
            code: None,
            message: "late".to_string(),
            fatal: false,
        },
    ));
}

// ---- consumer session ----

#[tokio::test]
async fn test_poll_timeout_is_none() {
    let broker = InMemoryBroker::new();
    broker.create_topic("in", 1);
    let consumer = ConsumerSession::new(broker.consumer("g1"), "g1");
    consumer.subscribe(&["in".to_string()]).unwrap();

    assert!(consumer.poll(Duration::from_millis(1)).await.unwrap().is_none());
    assert_eq!(consumer.stats().empty_polls, 1);
}

#[tokio::test]
async fn test_position_leaves_out_unread_partitions() {
    let broker = InMemoryBroker::new();
    broker.create_topic("in", 2);
    broker.produce_committed("in", 0, None, b"a");
    broker.produce_committed("in", 0, None, b"b");
    let consumer = ConsumerSession::new(broker.consumer("g1"), "g1");
    consumer.subscribe(&["in".to_string()]).unwrap();

    consumer.poll(Duration::ZERO).await.unwrap().unwrap();
    consumer.poll(Duration::ZERO).await.unwrap().unwrap();

    let assignment = consumer.assignment().unwrap();
    assert_eq!(assignment.len(), 2);
    let position = consumer.position(&assignment).unwrap();
    assert_eq!(position.offset(&TopicPartition::new("in", 0)), Some(2));
    assert_eq!(position.offset(&TopicPartition::new("in", 1)), None);
    assert_eq!(consumer.stats().messages_consumed, 2);
}

#[tokio::test]
async fn test_group_metadata_requires_membership() {
    let broker = InMemoryBroker::new();
    broker.create_topic("in", 1);
    let consumer = ConsumerSession::new(broker.consumer("g1"), "g1");

    let err = consumer.group_metadata().unwrap_err();
    assert!(matches!(err, KafkaError::GroupCoordination { .. }));

    consumer.subscribe(&["in".to_string()]).unwrap();
    assert_eq!(consumer.group_metadata().unwrap().group_id, "g1");

    consumer.close();
    assert!(consumer.group_metadata().is_err());
    assert_eq!(consumer.assignment().unwrap(), BTreeSet::new());
}

#[tokio::test]
async fn test_poll_errors_are_counted() {
    let broker = InMemoryBroker::new();
    broker.create_topic("in", 1);
    let consumer = ConsumerSession::new(broker.consumer("g1"), "g1");
    consumer.subscribe(&["in".to_string()]).unwrap();

    broker.fail_polls(1);
    assert!(consumer.poll(Duration::ZERO).await.is_err());
    assert!(consumer.poll(Duration::ZERO).await.unwrap().is_none());
    assert_eq!(consumer.stats().poll_errors, 1);
}
