//! Consumer session for the read side of the bridge.
//!
//! The consumer runs with `isolation.level=read_committed` and auto-commit
//! disabled: offsets only advance when the producer commits them inside a
//! transaction.

use async_trait::async_trait;
use chrono::DateTime;
use rdkafka::consumer::{
    BaseConsumer, Consumer, ConsumerContext, ConsumerGroupMetadata, Rebalance,
};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use eos_bridge_types::{ConsumedMessage, ConsumerPosition, TopicPartition};

use super::config::ConsumerConfig;
use super::error::{KafkaError, Result};

/// Read-side client operations.
///
/// `GroupMetadata` is the opaque group identity the producer needs to
/// attach consumed offsets to a transaction.
#[async_trait]
pub trait ConsumerBackend: Send + Sync {
    type GroupMetadata: Send + Sync + 'static;

    /// Join the group for the given topics.
    fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Wait up to `timeout` for the next message; `None` when nothing arrived.
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>>;

    /// Partitions currently assigned to this member.
    fn assignment(&self) -> Result<BTreeSet<TopicPartition>>;

    /// Next offset to read for each assigned partition that has one.
    fn position(&self, assignment: &BTreeSet<TopicPartition>) -> Result<ConsumerPosition>;

    /// Group identity for `send_offsets_to_transaction`.
    fn group_metadata(&self) -> Result<Self::GroupMetadata>;

    /// Leave the group.
    fn unsubscribe(&self);
}

/// Counters for the read side.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    messages_consumed: AtomicU64,
    bytes_consumed: AtomicU64,
    poll_errors: AtomicU64,
    empty_polls: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerStatsSnapshot {
    pub messages_consumed: u64,
    pub bytes_consumed: u64,
    pub poll_errors: u64,
    pub empty_polls: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
        }
    }
}

/// A group member reading from the input topics.
pub struct ConsumerSession<C> {
    backend: C,
    group_id: String,
    stats: ConsumerStats,
}

impl<C: ConsumerBackend> ConsumerSession<C> {
    pub fn new(backend: C, group_id: impl Into<String>) -> Self {
        Self {
            backend,
            group_id: group_id.into(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn subscribe(&self, topics: &[String]) -> Result<()> {
        self.backend.subscribe(topics)?;
        info!(group_id = %self.group_id, ?topics, "Subscribed to topics");
        Ok(())
    }

    /// Poll once. A timeout is `Ok(None)`, not an error.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        match self.backend.poll(timeout).await {
            Ok(Some(message)) => {
                self.stats.messages_consumed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_consumed
                    .fetch_add(message.size_bytes() as u64, Ordering::Relaxed);
                Ok(Some(message))
            }
            Ok(None) => {
                self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(err) => {
                self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
                warn!(group_id = %self.group_id, error = %err, "Poll failed");
                Err(err)
            }
        }
    }

    pub fn assignment(&self) -> Result<BTreeSet<TopicPartition>> {
        self.backend.assignment()
    }

    /// Next offset to read for each of `assignment`.
    ///
    /// Partitions that have not been read from since assignment carry no
    /// offset and are left out of the committed position.
    pub fn position(&self, assignment: &BTreeSet<TopicPartition>) -> Result<ConsumerPosition> {
        let position = self.backend.position(assignment)?;
        let unpositioned: Vec<String> = position.unpositioned().map(|tp| tp.to_string()).collect();
        if !unpositioned.is_empty() {
            debug!(group_id = %self.group_id, ?unpositioned, "Partitions without a position");
        }
        Ok(position)
    }

    pub fn group_metadata(&self) -> Result<C::GroupMetadata> {
        self.backend.group_metadata()
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn close(&self) {
        self.backend.unsubscribe();
        info!(group_id = %self.group_id, "Consumer session closed");
    }
}

/// Consumer callbacks: rebalance logging.
pub struct BridgeConsumerContext {
    group_id: String,
    rebalances: AtomicU64,
}

impl ClientContext for BridgeConsumerContext {
    fn error(&self, error: rdkafka::error::KafkaError, reason: &str) {
        error!(group_id = %self.group_id, error = %error, reason, "Consumer client error");
    }
}

impl ConsumerContext for BridgeConsumerContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                self.rebalances.fetch_add(1, Ordering::Relaxed);
                info!(group_id = %self.group_id, partitions = ?partition_list(tpl), "Partition revocation");
            }
            Rebalance::Assign(tpl) => {
                info!(group_id = %self.group_id, partitions = ?partition_list(tpl), "Partition assignment");
            }
            Rebalance::Error(err) => {
                error!(group_id = %self.group_id, "Rebalance error: {}", err);
            }
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(group_id = %self.group_id, partitions = ?partition_list(tpl), "Successfully assigned partitions");
            }
            Rebalance::Revoke(_) => {
                info!(group_id = %self.group_id, "Partitions revoked successfully");
            }
            Rebalance::Error(err) => {
                error!(group_id = %self.group_id, "Post-rebalance error: {}", err);
            }
        }
    }
}

fn partition_list(tpl: &TopicPartitionList) -> Vec<String> {
    tpl.elements()
        .iter()
        .map(|elem| format!("{}[{}]", elem.topic(), elem.partition()))
        .collect()
}

/// Consumer backend over an rdkafka [`BaseConsumer`].
///
/// `BaseConsumer::poll` blocks, so polls run on the blocking pool.
pub struct RdKafkaConsumer {
    consumer: Arc<BaseConsumer<BridgeConsumerContext>>,
    group_id: String,
}

impl RdKafkaConsumer {
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        config.validate()?;
        let context = BridgeConsumerContext {
            group_id: config.group_id.clone(),
            rebalances: AtomicU64::new(0),
        };
        let consumer: BaseConsumer<BridgeConsumerContext> =
            config.to_client_config().create_with_context(context)?;
        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: config.group_id.clone(),
        })
    }

    /// Number of revocations seen since the consumer was created.
    pub fn rebalance_count(&self) -> u64 {
        self.consumer.context().rebalances.load(Ordering::Relaxed)
    }
}

fn detach_message(msg: &BorrowedMessage<'_>) -> ConsumedMessage {
    let mut headers = HashMap::new();
    if let Some(msg_headers) = msg.headers() {
        for header in msg_headers.iter() {
            headers.insert(
                header.key.to_string(),
                header.value.map(|v| v.to_vec()).unwrap_or_default(),
            );
        }
    }

    ConsumedMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        payload: msg.payload().map(|p| p.to_vec()),
        headers,
        timestamp: msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}

#[async_trait]
impl ConsumerBackend for RdKafkaConsumer {
    type GroupMetadata = ConsumerGroupMetadata;

    fn subscribe(&self, topics: &[String]) -> Result<()> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        let consumer = Arc::clone(&self.consumer);
        let polled = tokio::task::spawn_blocking(move || match consumer.poll(timeout) {
            None => Ok(None),
            Some(Ok(msg)) => Ok(Some(detach_message(&msg))),
            Some(Err(err)) => Err(err),
        })
        .await
        .map_err(|e| KafkaError::Other(format!("poll task failed: {}", e)))?;

        match polled {
            Ok(message) => Ok(message),
            Err(rdkafka::error::KafkaError::PartitionEOF(partition)) => {
                debug!(partition, "Reached end of partition");
                Ok(None)
            }
            Err(err) => Err(KafkaError::from(err)),
        }
    }

    fn assignment(&self) -> Result<BTreeSet<TopicPartition>> {
        let tpl = self.consumer.assignment()?;
        Ok(tpl
            .elements()
            .iter()
            .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
            .collect())
    }

    fn position(&self, assignment: &BTreeSet<TopicPartition>) -> Result<ConsumerPosition> {
        let tpl = self.consumer.position()?;
        let mut position = ConsumerPosition::new(assignment.clone());
        for elem in tpl.elements() {
            if let Offset::Offset(offset) = elem.offset() {
                position.set_offset(TopicPartition::new(elem.topic(), elem.partition()), offset);
            }
        }
        Ok(position)
    }

    fn group_metadata(&self) -> Result<ConsumerGroupMetadata> {
        self.consumer.group_metadata().ok_or_else(|| {
            KafkaError::group_coordination("consumer has no group metadata", self.group_id.clone())
        })
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }
}
