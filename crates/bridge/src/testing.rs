//! In-memory broker for tests and benchmarks.
//!
//! [`InMemoryBroker`] implements the admin, consumer and producer backends
//! against one shared, lock-protected log. It models the parts of Kafka the
//! bridge relies on:
//!
//! - records written inside a transaction stay invisible to consumers until
//!   the commit, and aborted records are skipped;
//! - offsets sent to a transaction become the group's committed offsets
//!   only when that transaction commits;
//! - re-initializing a transactional identity aborts what it left open.
//!
//! Each consumer group has a single member that is assigned every partition
//! of its subscribed topics, unless a test pins the assignment with
//! [`InMemoryBroker::reassign`]. Failures are injected through one-shot
//! fault switches.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use eos_bridge_types::{ConsumedMessage, ConsumerPosition, OutputRecord, TopicPartition, TopicSpec};

use crate::bridge::ExactlyOnceBridge;
use crate::error::{BridgeError, Result as BridgeResult};
use crate::kafka::admin::{AdminBackend, ClusterMetadata, DeletionResult};
use crate::kafka::consumer::{ConsumerBackend, ConsumerSession};
use crate::kafka::error::{ErrorClass, KafkaError, Result};
use crate::kafka::producer::{
    ClientEvent, DeliveryReport, DeliverySender, ProducerBackend, TransactionTimeouts,
    TransactionalProducerSession,
};
use crate::status::{CycleOutcome, CycleStatusSink};

/// A record as stored in a partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Visibility {
    Pending,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    headers: HashMap<String, Vec<u8>>,
    visibility: Visibility,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    replication_factor: i32,
    retention_ms: i64,
    retention_bytes: i64,
    next_partition: usize,
}

impl TopicLog {
    fn new(partitions: usize, replication_factor: i32, retention_ms: i64, retention_bytes: i64) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            replication_factor,
            retention_ms,
            retention_bytes,
            next_partition: 0,
        }
    }
}

#[derive(Debug, Default)]
struct OpenTransaction {
    records: Vec<(TopicPartition, usize)>,
    offsets: Option<(String, BTreeMap<TopicPartition, i64>)>,
    sends: usize,
}

#[derive(Debug, Default)]
struct ProducerEntry {
    initialized: bool,
    transaction: Option<OpenTransaction>,
    events: Option<mpsc::UnboundedSender<ClientEvent>>,
}

#[derive(Debug, Default)]
struct GroupState {
    subscription: Vec<String>,
    subscribed: bool,
    pinned: Option<BTreeSet<TopicPartition>>,
    cursors: BTreeMap<TopicPartition, i64>,
    positioned: BTreeSet<TopicPartition>,
    committed: BTreeMap<TopicPartition, i64>,
}

#[derive(Debug, Default)]
struct Faults {
    begin: Option<ErrorClass>,
    delivery_failure_at: Option<usize>,
    delivery_channel_closed_at: Option<usize>,
    send_offsets: Option<ErrorClass>,
    commit: Option<ErrorClass>,
    abort: Option<ErrorClass>,
    abort_finds_no_transaction: bool,
    poll_errors: u32,
}

#[derive(Debug)]
struct BrokerState {
    broker_count: usize,
    topics: BTreeMap<String, TopicLog>,
    groups: HashMap<String, GroupState>,
    producers: HashMap<String, ProducerEntry>,
    faults: Faults,
}

impl BrokerState {
    fn assignment(&self, group: &GroupState) -> BTreeSet<TopicPartition> {
        if !group.subscribed {
            return BTreeSet::new();
        }
        if let Some(pinned) = &group.pinned {
            return pinned.clone();
        }
        group
            .subscription
            .iter()
            .filter_map(|topic| self.topics.get(topic).map(|log| (topic, log)))
            .flat_map(|(topic, log)| {
                (0..log.partitions.len()).map(move |p| TopicPartition::new(topic.clone(), p as i32))
            })
            .collect()
    }

    fn resolve_transaction(&mut self, transaction: OpenTransaction, commit: bool) {
        let visibility = if commit {
            Visibility::Committed
        } else {
            Visibility::Aborted
        };
        for (tp, index) in &transaction.records {
            if let Some(record) = self
                .topics
                .get_mut(&tp.topic)
                .and_then(|log| log.partitions.get_mut(tp.partition as usize))
                .and_then(|partition| partition.get_mut(*index))
            {
                record.visibility = visibility.clone();
            }
        }
        if commit {
            if let Some((group_id, offsets)) = transaction.offsets {
                let group = self.groups.entry(group_id).or_default();
                group.committed.extend(offsets);
            }
        }
    }

    fn append(
        &mut self,
        record: &OutputRecord,
    ) -> std::result::Result<(TopicPartition, usize), KafkaError> {
        let Some(log) = self
            .topics
            .get_mut(&record.topic)
            .filter(|log| !log.partitions.is_empty())
        else {
            return Err(KafkaError::delivery(
                "Broker: Unknown topic or partition",
                &record.topic,
                record.partition,
            ));
        };
        let count = log.partitions.len();
        let partition = match (record.partition, &record.partition_key) {
            (Some(partition), _) => partition as usize,
            (None, Some(key)) => key_hash(key) % count,
            (None, None) => {
                let partition = log.next_partition % count;
                log.next_partition += 1;
                partition
            }
        };
        let Some(log_partition) = log.partitions.get_mut(partition) else {
            return Err(KafkaError::delivery(
                "Broker: Unknown topic or partition",
                &record.topic,
                record.partition,
            ));
        };
        log_partition.push(StoredRecord {
            key: record.partition_key.clone(),
            value: record.value.clone(),
            headers: record.headers.clone(),
            visibility: Visibility::Pending,
        });
        Ok((
            TopicPartition::new(record.topic.clone(), partition as i32),
            log_partition.len() - 1,
        ))
    }
}

fn key_hash(key: &[u8]) -> usize {
    key.iter()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(*b))) as usize
}

fn injected(operation: &str, class: ErrorClass) -> KafkaError {
    KafkaError::transaction(operation, format!("injected {} failure", class), class)
}

fn no_transaction(operation: &str) -> KafkaError {
    KafkaError::invalid_state(operation, "Operation not valid in state Ready: no transaction in progress")
}

/// Shared in-memory cluster. Clones share the same state.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Single-broker cluster with no topics.
    pub fn new() -> Self {
        Self::with_brokers(1)
    }

    pub fn with_brokers(broker_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                broker_count,
                topics: BTreeMap::new(),
                groups: HashMap::new(),
                producers: HashMap::new(),
                faults: Faults::default(),
            })),
        }
    }

    pub fn set_broker_count(&self, broker_count: usize) {
        self.state.lock().broker_count = broker_count;
    }

    pub fn admin(&self) -> InMemoryAdmin {
        InMemoryAdmin {
            broker: self.clone(),
        }
    }

    pub fn consumer(&self, group_id: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            group_id: group_id.into(),
        }
    }

    /// Producer client for a transactional identity.
    ///
    /// A new client for an identity that already exists replaces the old
    /// one's event channel, like a restarted process would.
    pub fn producer(&self, transactional_id: impl Into<String>) -> InMemoryProducer {
        let transactional_id = transactional_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let entry = state.producers.entry(transactional_id.clone()).or_default();
        entry.initialized = false;
        entry.events = Some(events_tx);
        InMemoryProducer {
            broker: self.clone(),
            transactional_id,
            events: Mutex::new(Some(events_rx)),
        }
    }

    /// A bridge wired to this broker, subscribed to `input_topics`.
    ///
    /// Must be called inside a Tokio runtime. Transactions are not
    /// initialized yet.
    pub fn bridge(
        &self,
        group_id: &str,
        transactional_id: &str,
        input_topics: &[String],
        status: Arc<dyn CycleStatusSink>,
    ) -> Result<ExactlyOnceBridge<InMemoryConsumer, InMemoryProducer>> {
        let consumer = ConsumerSession::new(self.consumer(group_id), group_id);
        if !input_topics.is_empty() {
            consumer.subscribe(input_topics)?;
        }
        let producer = TransactionalProducerSession::new(
            self.producer(transactional_id),
            transactional_id,
            TransactionTimeouts::default(),
        );
        Ok(ExactlyOnceBridge::new(consumer, producer, status))
    }

    /// Create a topic directly, bypassing the admin API.
    pub fn create_topic(&self, name: &str, partitions: usize) {
        self.state
            .lock()
            .topics
            .entry(name.to_string())
            .or_insert_with(|| TopicLog::new(partitions, 1, -1, -1));
    }

    /// Append a committed record, creating the topic on first use. Returns its offset.
    pub fn produce_committed(&self, topic: &str, partition: i32, key: Option<&[u8]>, value: &[u8]) -> i64 {
        let mut state = self.state.lock();
        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(partition as usize + 1, 1, -1, -1));
        while log.partitions.len() <= partition as usize {
            log.partitions.push(Vec::new());
        }
        let records = &mut log.partitions[partition as usize];
        records.push(StoredRecord {
            key: key.map(<[u8]>::to_vec),
            value: Some(value.to_vec()),
            headers: HashMap::new(),
            visibility: Visibility::Committed,
        });
        records.len() as i64 - 1
    }

    /// Records a `read_committed` consumer would see, in partition then offset order.
    pub fn read_committed(&self, topic: &str) -> Vec<BrokerRecord> {
        self.read(topic, |visibility| *visibility == Visibility::Committed)
    }

    /// Every record written to the topic, including pending and aborted ones.
    pub fn read_uncommitted(&self, topic: &str) -> Vec<BrokerRecord> {
        self.read(topic, |_| true)
    }

    fn read(&self, topic: &str, visible: impl Fn(&Visibility) -> bool) -> Vec<BrokerRecord> {
        let state = self.state.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        let visible = &visible;
        log.partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records
                    .iter()
                    .enumerate()
                    .filter(move |(_, record)| visible(&record.visibility))
                    .map(move |(offset, record)| BrokerRecord {
                        topic: topic.to_string(),
                        partition: partition as i32,
                        offset: offset as i64,
                        key: record.key.clone(),
                        value: record.value.clone(),
                        headers: record.headers.clone(),
                    })
            })
            .collect()
    }

    pub fn committed_offset(&self, group_id: &str, partition: &TopicPartition) -> Option<i64> {
        self.state
            .lock()
            .groups
            .get(group_id)
            .and_then(|group| group.committed.get(partition).copied())
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.state.lock().topics.get(topic).map(|log| log.partitions.len())
    }

    pub fn replication_factor(&self, topic: &str) -> Option<i32> {
        self.state.lock().topics.get(topic).map(|log| log.replication_factor)
    }

    /// `(retention.ms, retention.bytes)` the topic was created with.
    pub fn retention(&self, topic: &str) -> Option<(i64, i64)> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|log| (log.retention_ms, log.retention_bytes))
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.state.lock().groups.contains_key(group_id)
    }

    pub fn transaction_open(&self, transactional_id: &str) -> bool {
        self.state
            .lock()
            .producers
            .get(transactional_id)
            .is_some_and(|entry| entry.transaction.is_some())
    }

    /// Pin a group's assignment, as a rebalance would.
    pub fn reassign(&self, group_id: &str, partitions: impl IntoIterator<Item = TopicPartition>) {
        let mut state = self.state.lock();
        let group = state.groups.entry(group_id.to_string()).or_default();
        let pinned: BTreeSet<TopicPartition> = partitions.into_iter().collect();
        group.cursors.retain(|tp, _| pinned.contains(tp));
        group.positioned.retain(|tp| pinned.contains(tp));
        group.pinned = Some(pinned);
    }

    /// Fail the next `begin_transaction` with the given class.
    pub fn fail_begin(&self, class: ErrorClass) {
        self.state.lock().faults.begin = Some(class);
    }

    /// Report a delivery failure for the `index`-th record of the next transaction.
    pub fn fail_delivery_at(&self, index: usize) {
        self.state.lock().faults.delivery_failure_at = Some(index);
    }

    /// Drop the report sender of the `index`-th record of the next
    /// transaction without reporting.
    pub fn close_delivery_channel_at(&self, index: usize) {
        self.state.lock().faults.delivery_channel_closed_at = Some(index);
    }

    pub fn fail_send_offsets(&self, class: ErrorClass) {
        self.state.lock().faults.send_offsets = Some(class);
    }

    pub fn fail_commit(&self, class: ErrorClass) {
        self.state.lock().faults.commit = Some(class);
    }

    /// Fail the next abort; the transaction stays open on the broker.
    pub fn fail_abort(&self, class: ErrorClass) {
        self.state.lock().faults.abort = Some(class);
    }

    /// The next abort finds the transaction already resolved by the broker.
    pub fn abort_finds_no_transaction(&self) {
        self.state.lock().faults.abort_finds_no_transaction = true;
    }

    /// Fail the next `count` polls.
    pub fn fail_polls(&self, count: u32) {
        self.state.lock().faults.poll_errors = count;
    }

    /// Deliver a client event to a producer's listener. False if nobody listens.
    pub fn emit_client_event(&self, transactional_id: &str, event: ClientEvent) -> bool {
        self.state
            .lock()
            .producers
            .get(transactional_id)
            .and_then(|entry| entry.events.as_ref())
            .is_some_and(|events| events.send(event).is_ok())
    }
}

/// Admin client of an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryAdmin {
    broker: InMemoryBroker,
}

#[async_trait]
impl AdminBackend for InMemoryAdmin {
    async fn cluster_metadata(&self) -> Result<ClusterMetadata> {
        let state = self.broker.state.lock();
        Ok(ClusterMetadata {
            broker_count: state.broker_count,
            topics: state
                .topics
                .iter()
                .map(|(name, log)| (name.clone(), log.partitions.len()))
                .collect(),
        })
    }

    async fn create_topic(&self, spec: &TopicSpec, replication_factor: i32) -> Result<()> {
        let mut state = self.broker.state.lock();
        if state.topics.contains_key(&spec.name) {
            return Err(KafkaError::TopicAlreadyExists {
                topic: spec.name.clone(),
            });
        }
        state.topics.insert(
            spec.name.clone(),
            TopicLog::new(
                spec.desired_partition_count,
                replication_factor,
                spec.retention_ms,
                spec.retention_bytes,
            ),
        );
        Ok(())
    }

    async fn create_partitions(&self, topic: &str, total: usize) -> Result<()> {
        let mut state = self.broker.state.lock();
        let Some(log) = state.topics.get_mut(topic) else {
            return Err(KafkaError::TopicNotFound {
                topic: topic.to_string(),
            });
        };
        if total <= log.partitions.len() {
            return Err(KafkaError::PartitionsAlreadySufficient {
                topic: topic.to_string(),
                requested: total,
            });
        }
        log.partitions.resize_with(total, Vec::new);
        Ok(())
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<Vec<DeletionResult>> {
        let mut state = self.broker.state.lock();
        Ok(topics
            .iter()
            .map(|name| match state.topics.remove(name) {
                Some(_) => (name.clone(), Ok(())),
                None => (
                    name.clone(),
                    Err(KafkaError::TopicNotFound {
                        topic: name.clone(),
                    }),
                ),
            })
            .collect())
    }

    async fn delete_groups(&self, groups: &[String]) -> Result<Vec<DeletionResult>> {
        let mut state = self.broker.state.lock();
        Ok(groups
            .iter()
            .map(|name| match state.groups.remove(name) {
                Some(_) => (name.clone(), Ok(())),
                None => (
                    name.clone(),
                    Err(KafkaError::GroupNotFound {
                        group_id: name.clone(),
                    }),
                ),
            })
            .collect())
    }
}

/// Group identity handed from [`InMemoryConsumer`] to [`InMemoryProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryGroupMetadata {
    pub group_id: String,
}

/// Consumer client of an [`InMemoryBroker`] with `read_committed` isolation.
#[derive(Debug, Clone)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
}

impl InMemoryConsumer {
    fn fetch(&self) -> Result<Option<ConsumedMessage>> {
        let mut state = self.broker.state.lock();
        if state.faults.poll_errors > 0 {
            state.faults.poll_errors -= 1;
            return Err(KafkaError::consumption("injected poll failure", None, None));
        }

        let Some(group) = state.groups.get(&self.group_id) else {
            return Ok(None);
        };
        let assignment = state.assignment(group);

        for tp in assignment {
            let group = match state.groups.get(&self.group_id) {
                Some(group) => group,
                None => return Ok(None),
            };
            let start = group
                .cursors
                .get(&tp)
                .or_else(|| group.committed.get(&tp))
                .copied()
                .unwrap_or(0) as usize;
            let Some(records) = state
                .topics
                .get(&tp.topic)
                .and_then(|log| log.partitions.get(tp.partition as usize))
            else {
                continue;
            };

            let mut next = start;
            let mut found = None;
            while let Some(record) = records.get(next) {
                match record.visibility {
                    Visibility::Aborted => next += 1,
                    // Nothing past an open transaction is readable yet.
                    Visibility::Pending => break,
                    Visibility::Committed => {
                        found = Some(ConsumedMessage {
                            topic: tp.topic.clone(),
                            partition: tp.partition,
                            offset: next as i64,
                            key: record.key.clone(),
                            payload: record.value.clone(),
                            headers: record.headers.clone(),
                            timestamp: None,
                        });
                        next += 1;
                        break;
                    }
                }
            }

            if let Some(group) = state.groups.get_mut(&self.group_id) {
                if next != start {
                    group.cursors.insert(tp.clone(), next as i64);
                }
                if found.is_some() {
                    group.positioned.insert(tp);
                    return Ok(found);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ConsumerBackend for InMemoryConsumer {
    type GroupMetadata = InMemoryGroupMetadata;

    fn subscribe(&self, topics: &[String]) -> Result<()> {
        let mut state = self.broker.state.lock();
        let group = state.groups.entry(self.group_id.clone()).or_default();
        group.subscription = topics.to_vec();
        group.subscribed = true;
        group.pinned = None;
        group.cursors.clear();
        group.positioned = group.committed.keys().cloned().collect();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        if let Some(message) = self.fetch()? {
            return Ok(Some(message));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    fn assignment(&self) -> Result<BTreeSet<TopicPartition>> {
        let state = self.broker.state.lock();
        Ok(state
            .groups
            .get(&self.group_id)
            .map(|group| state.assignment(group))
            .unwrap_or_default())
    }

    /// A partition has a position once a message was read from it, or when
    /// the group had a committed offset for it at subscription.
    fn position(&self, assignment: &BTreeSet<TopicPartition>) -> Result<ConsumerPosition> {
        let state = self.broker.state.lock();
        let mut position = ConsumerPosition::new(assignment.clone());
        if let Some(group) = state.groups.get(&self.group_id) {
            for tp in assignment.iter().filter(|tp| group.positioned.contains(*tp)) {
                let offset = group
                    .cursors
                    .get(tp)
                    .or_else(|| group.committed.get(tp))
                    .copied();
                if let Some(offset) = offset {
                    position.set_offset(tp.clone(), offset);
                }
            }
        }
        Ok(position)
    }

    fn group_metadata(&self) -> Result<InMemoryGroupMetadata> {
        let state = self.broker.state.lock();
        match state.groups.get(&self.group_id) {
            Some(group) if group.subscribed => Ok(InMemoryGroupMetadata {
                group_id: self.group_id.clone(),
            }),
            _ => Err(KafkaError::group_coordination(
                "consumer is not a group member",
                self.group_id.clone(),
            )),
        }
    }

    fn unsubscribe(&self) {
        let mut state = self.broker.state.lock();
        if let Some(group) = state.groups.get_mut(&self.group_id) {
            group.subscribed = false;
            group.subscription.clear();
            group.pinned = None;
            group.cursors.clear();
            group.positioned.clear();
        }
    }
}

/// Transactional producer client of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryProducer {
    broker: InMemoryBroker,
    transactional_id: String,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

#[async_trait]
impl ProducerBackend for InMemoryProducer {
    type GroupMetadata = InMemoryGroupMetadata;

    async fn init_transactions(&self, _timeout: Duration) -> Result<()> {
        let mut state = self.broker.state.lock();
        let left_open = state
            .producers
            .get_mut(&self.transactional_id)
            .and_then(|entry| {
                entry.initialized = true;
                entry.transaction.take()
            });
        if let Some(transaction) = left_open {
            state.resolve_transaction(transaction, false);
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(class) = state.faults.begin.take() {
            return Err(injected("begin_transaction", class));
        }
        let entry = state.producers.entry(self.transactional_id.clone()).or_default();
        if !entry.initialized {
            return Err(KafkaError::invalid_state(
                "begin_transaction",
                "transactions not initialized",
            ));
        }
        if entry.transaction.is_some() {
            return Err(KafkaError::invalid_state(
                "begin_transaction",
                "transaction already in progress",
            ));
        }
        entry.transaction = Some(OpenTransaction::default());
        Ok(())
    }

    fn send(&self, record: &OutputRecord, reports: DeliverySender) -> Result<()> {
        let mut state = self.broker.state.lock();
        let index = match state
            .producers
            .get_mut(&self.transactional_id)
            .and_then(|entry| entry.transaction.as_mut())
        {
            Some(transaction) => {
                transaction.sends += 1;
                transaction.sends - 1
            }
            None => return Err(no_transaction("send")),
        };

        if state.faults.delivery_channel_closed_at == Some(index) {
            state.faults.delivery_channel_closed_at = None;
            drop(reports);
            return Ok(());
        }

        let report = if state.faults.delivery_failure_at == Some(index) {
            state.faults.delivery_failure_at = None;
            DeliveryReport::failed(
                &record.topic,
                record.partition,
                KafkaError::delivery("injected delivery failure", &record.topic, record.partition),
            )
        } else {
            match state.append(record) {
                Ok((tp, offset)) => {
                    if let Some(transaction) = state
                        .producers
                        .get_mut(&self.transactional_id)
                        .and_then(|entry| entry.transaction.as_mut())
                    {
                        transaction.records.push((tp.clone(), offset));
                    }
                    DeliveryReport::delivered(tp.topic, tp.partition, offset as i64)
                }
                Err(err) => DeliveryReport::failed(&record.topic, record.partition, err),
            }
        };

        reports
            .try_send(report)
            .map_err(|e| KafkaError::Other(format!("delivery report not accepted: {}", e)))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn send_offsets_to_transaction(
        &self,
        position: &ConsumerPosition,
        group: InMemoryGroupMetadata,
        _timeout: Duration,
    ) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(class) = state.faults.send_offsets.take() {
            return Err(injected("send_offsets_to_transaction", class));
        }
        let transaction = state
            .producers
            .get_mut(&self.transactional_id)
            .and_then(|entry| entry.transaction.as_mut())
            .ok_or_else(|| no_transaction("send_offsets_to_transaction"))?;
        transaction.offsets = Some((group.group_id, position.offsets.clone()));
        Ok(())
    }

    async fn commit_transaction(&self, _timeout: Duration) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(class) = state.faults.commit.take() {
            return Err(injected("commit_transaction", class));
        }
        let transaction = state
            .producers
            .get_mut(&self.transactional_id)
            .and_then(|entry| entry.transaction.take())
            .ok_or_else(|| no_transaction("commit_transaction"))?;
        state.resolve_transaction(transaction, true);
        Ok(())
    }

    async fn abort_transaction(&self, _timeout: Duration) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(class) = state.faults.abort.take() {
            return Err(injected("abort_transaction", class));
        }
        let transaction = state
            .producers
            .get_mut(&self.transactional_id)
            .and_then(|entry| entry.transaction.take());
        let already_resolved = std::mem::take(&mut state.faults.abort_finds_no_transaction);
        match transaction {
            Some(transaction) => {
                state.resolve_transaction(transaction, false);
                if already_resolved {
                    return Err(no_transaction("abort_transaction"));
                }
                Ok(())
            }
            None => Err(no_transaction("abort_transaction")),
        }
    }

    fn take_client_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.lock().take()
    }
}

/// Status sink that keeps every outcome it receives.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    outcomes: Mutex<Vec<CycleOutcome>>,
    failing: AtomicBool,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records, then reports a failure.
    pub fn failing() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            failing: AtomicBool::new(true),
        }
    }

    pub fn outcomes(&self) -> Vec<CycleOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

#[async_trait]
impl CycleStatusSink for RecordingStatusSink {
    async fn record(&self, outcome: &CycleOutcome) -> BridgeResult<()> {
        self.outcomes.lock().push(outcome.clone());
        if self.failing.load(Ordering::Relaxed) {
            return Err(BridgeError::status_sink("status store unavailable"));
        }
        Ok(())
    }
}
