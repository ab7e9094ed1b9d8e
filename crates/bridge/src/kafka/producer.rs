//! Transactional producer session for the write side of the bridge.
//!
//! A session owns one transactional identity. It tracks the transaction
//! state locally so that an abort is only issued while a transaction can be
//! open, and it owns the listener draining the client's error events for as
//! long as the producer lives.

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerGroupMetadata;
use rdkafka::error::{KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use eos_bridge_types::{AbortOutcome, ConsumerPosition, OutputRecord, TransactionState};

use super::config::ProducerConfig;
use super::error::{ErrorClass, KafkaError, Result};

/// Outcome of one produced record.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Topic the record was addressed to
    pub topic: String,
    /// Partition the record landed on, when one was assigned
    pub partition: Option<i32>,
    /// Offset of the record, when it was written
    pub offset: Option<i64>,
    /// Delivery failure, if any
    pub error: Option<KafkaError>,
}

impl DeliveryReport {
    pub fn delivered(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition),
            offset: Some(offset),
            error: None,
        }
    }

    pub fn failed(topic: impl Into<String>, partition: Option<i32>, error: KafkaError) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: None,
            error: Some(error),
        }
    }
}

/// Sender half handed to the client with every record.
pub type DeliverySender = mpsc::Sender<DeliveryReport>;

/// Instance-level client event (broker down, authentication failure, ...).
#[derive(Debug, Clone)]
pub struct ClientEvent {
    /// librdkafka error code, when known
    pub code: Option<RDKafkaErrorCode>,
    /// Human-readable description
    pub message: String,
    /// The client cannot recover; the producer must be recreated
    pub fatal: bool,
}

/// Write-side client operations.
///
/// Transaction calls may block on the coordinator; implementations bound
/// each by the timeout they are given.
#[async_trait]
pub trait ProducerBackend: Send + Sync {
    type GroupMetadata: Send + Sync + 'static;

    async fn init_transactions(&self, timeout: Duration) -> Result<()>;

    async fn begin_transaction(&self) -> Result<()>;

    /// Enqueue a record. Exactly one report for it must eventually be sent
    /// on `reports`, unless the enqueue itself fails.
    fn send(&self, record: &OutputRecord, reports: DeliverySender) -> Result<()>;

    async fn flush(&self, timeout: Duration) -> Result<()>;

    async fn send_offsets_to_transaction(
        &self,
        position: &ConsumerPosition,
        group: Self::GroupMetadata,
        timeout: Duration,
    ) -> Result<()>;

    async fn commit_transaction(&self, timeout: Duration) -> Result<()>;

    async fn abort_transaction(&self, timeout: Duration) -> Result<()>;

    /// Client error events. Returns the receiver once; later calls get `None`.
    fn take_client_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>>;
}

/// Producer callbacks: delivery reports, client errors and librdkafka logs.
pub struct BridgeProducerContext {
    transactional_id: String,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientContext for BridgeProducerContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        let id = &self.transactional_id;
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(target: "librdkafka", transactional_id = %id, "{} {}", fac, log_message),
            RDKafkaLogLevel::Warning => warn!(target: "librdkafka", transactional_id = %id, "{} {}", fac, log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(target: "librdkafka", transactional_id = %id, "{} {}", fac, log_message)
            }
            RDKafkaLogLevel::Debug => debug!(target: "librdkafka", transactional_id = %id, "{} {}", fac, log_message),
        }
    }

    fn error(&self, error: rdkafka::error::KafkaError, reason: &str) {
        let code = error.rdkafka_error_code();
        let event = ClientEvent {
            code,
            message: format!("{}: {}", error, reason),
            fatal: code == Some(RDKafkaErrorCode::Fatal),
        };
        // The listener is gone only after the producer is closed.
        let _ = self.events.send(event);
    }
}

impl ProducerContext for BridgeProducerContext {
    type DeliveryOpaque = Box<DeliverySender>;

    fn delivery(&self, result: &DeliveryResult<'_>, reports: Self::DeliveryOpaque) {
        let report = match result {
            Ok(msg) => DeliveryReport::delivered(msg.topic(), msg.partition(), msg.offset()),
            Err((err, msg)) => {
                let partition = Some(msg.partition()).filter(|p| *p >= 0);
                DeliveryReport::failed(
                    msg.topic(),
                    partition,
                    KafkaError::delivery(err.to_string(), msg.topic(), partition),
                )
            }
        };
        if reports.try_send(report).is_err() {
            warn!(transactional_id = %self.transactional_id, "Delivery report dropped, receiver gone");
        }
    }
}

/// Producer backend over an rdkafka [`ThreadedProducer`].
///
/// The transaction API of librdkafka blocks the calling thread, so each
/// call runs on the blocking pool against a shared handle.
pub struct RdKafkaProducer {
    producer: Arc<ThreadedProducer<BridgeProducerContext>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl RdKafkaProducer {
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let context = BridgeProducerContext {
            transactional_id: config.transactional_id.clone(),
            events: events_tx,
        };
        let producer: ThreadedProducer<BridgeProducerContext> =
            config.to_client_config().create_with_context(context)?;
        Ok(Self {
            producer: Arc::new(producer),
            events: Mutex::new(Some(events_rx)),
        })
    }

    async fn run_blocking<F>(&self, operation: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&ThreadedProducer<BridgeProducerContext>) -> KafkaResult<()> + Send + 'static,
    {
        let producer = Arc::clone(&self.producer);
        tokio::task::spawn_blocking(move || f(&producer))
            .await
            .map_err(|e| KafkaError::Other(format!("{} task failed: {}", operation, e)))?
            .map_err(|e| KafkaError::from_transactional_call(operation, e))
    }
}

fn offsets_list(position: &ConsumerPosition) -> Result<TopicPartitionList> {
    let mut tpl = TopicPartitionList::with_capacity(position.offsets.len());
    for (tp, offset) in &position.offsets {
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
    }
    Ok(tpl)
}

#[async_trait]
impl ProducerBackend for RdKafkaProducer {
    type GroupMetadata = ConsumerGroupMetadata;

    async fn init_transactions(&self, timeout: Duration) -> Result<()> {
        self.run_blocking("init_transactions", move |p| p.init_transactions(timeout))
            .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.run_blocking("begin_transaction", |p| p.begin_transaction())
            .await
    }

    fn send(&self, record: &OutputRecord, reports: DeliverySender) -> Result<()> {
        let mut base: BaseRecord<'_, [u8], [u8], Box<DeliverySender>> =
            BaseRecord::with_opaque_to(&record.topic, Box::new(reports));
        if let Some(ref value) = record.value {
            base = base.payload(value.as_slice());
        }
        if let Some(ref key) = record.partition_key {
            base = base.key(key.as_slice());
        }
        if let Some(partition) = record.partition {
            base = base.partition(partition);
        }
        if !record.headers.is_empty() {
            let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
            for (key, value) in &record.headers {
                headers = headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_slice()),
                });
            }
            base = base.headers(headers);
        }

        self.producer.send(base).map_err(|(err, _)| {
            KafkaError::delivery(format!("enqueue failed: {}", err), &record.topic, record.partition)
        })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = Arc::clone(&self.producer);
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| KafkaError::Other(format!("flush task failed: {}", e)))?
            .map_err(KafkaError::from)
    }

    async fn send_offsets_to_transaction(
        &self,
        position: &ConsumerPosition,
        group: ConsumerGroupMetadata,
        timeout: Duration,
    ) -> Result<()> {
        let offsets = offsets_list(position)?;
        self.run_blocking("send_offsets_to_transaction", move |p| {
            p.send_offsets_to_transaction(&offsets, &group, timeout)
        })
        .await
    }

    async fn commit_transaction(&self, timeout: Duration) -> Result<()> {
        self.run_blocking("commit_transaction", move |p| p.commit_transaction(timeout))
            .await
    }

    async fn abort_transaction(&self, timeout: Duration) -> Result<()> {
        self.run_blocking("abort_transaction", move |p| p.abort_transaction(timeout))
            .await
    }

    fn take_client_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.lock().take()
    }
}

/// Counters for the write side.
#[derive(Debug, Default)]
pub struct ProducerStats {
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    records_produced: AtomicU64,
    bytes_produced: AtomicU64,
    delivery_failures: AtomicU64,
    client_errors: AtomicU64,
}

/// Point-in-time copy of [`ProducerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProducerStatsSnapshot {
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub records_produced: u64,
    pub bytes_produced: u64,
    pub delivery_failures: u64,
    pub client_errors: u64,
}

impl ProducerStats {
    pub fn snapshot(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            transactions_begun: self.transactions_begun.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            records_produced: self.records_produced.load(Ordering::Relaxed),
            bytes_produced: self.bytes_produced.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
        }
    }
}

/// Background task logging client events until shut down.
///
/// Fatal events flip the shared flag so the session refuses to begin new
/// transactions on a dead producer.
pub struct ClientEventListener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ClientEventListener {
    pub fn spawn(
        transactional_id: String,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
        failed: Arc<AtomicBool>,
        stats: Arc<ProducerStats>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            stats.client_errors.fetch_add(1, Ordering::Relaxed);
                            if event.fatal {
                                failed.store(true, Ordering::SeqCst);
                                error!(transactional_id = %transactional_id, code = ?event.code, "Fatal producer error: {}", event.message);
                            } else {
                                warn!(transactional_id = %transactional_id, code = ?event.code, "Producer client error: {}", event.message);
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!(transactional_id = %transactional_id, "Client event listener stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Client event listener panicked: {}", e);
        }
    }
}

/// Timeouts applied by a [`TransactionalProducerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionTimeouts {
    /// Bound for init, send-offsets, commit and abort
    pub transaction: Duration,
    /// Bound for the flush before commit
    pub flush: Duration,
}

impl Default for TransactionTimeouts {
    fn default() -> Self {
        Self {
            transaction: Duration::from_secs(60),
            flush: Duration::from_secs(30),
        }
    }
}

impl From<&ProducerConfig> for TransactionTimeouts {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            transaction: config.transaction_timeout,
            flush: config.flush_timeout,
        }
    }
}

/// One transactional producer identity and its transaction state.
///
/// Must be created inside a Tokio runtime: it spawns the client event
/// listener, which [`close`](Self::close) stops and joins.
pub struct TransactionalProducerSession<P> {
    backend: P,
    transactional_id: String,
    timeouts: TransactionTimeouts,
    state: TransactionState,
    initialized: bool,
    failed: Arc<AtomicBool>,
    stats: Arc<ProducerStats>,
    listener: Option<ClientEventListener>,
}

impl<P: ProducerBackend> TransactionalProducerSession<P> {
    pub fn new(backend: P, transactional_id: impl Into<String>, timeouts: TransactionTimeouts) -> Self {
        let transactional_id = transactional_id.into();
        let failed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ProducerStats::default());
        let listener = backend.take_client_events().map(|events| {
            ClientEventListener::spawn(
                transactional_id.clone(),
                events,
                Arc::clone(&failed),
                Arc::clone(&stats),
            )
        });

        Self {
            backend,
            transactional_id,
            timeouts,
            state: TransactionState::Idle,
            initialized: false,
            failed,
            stats,
            listener,
        }
    }

    pub fn transactional_id(&self) -> &str {
        &self.transactional_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn stats(&self) -> ProducerStatsSnapshot {
        self.stats.snapshot()
    }

    /// True once a fatal client error was reported; the producer must be recreated.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Register the transactional identity with the coordinator.
    ///
    /// Fences older producers with the same identity and aborts any
    /// transaction they left open. Runs once per session.
    pub async fn init_transactions(&mut self) -> Result<()> {
        if self.initialized {
            return Err(KafkaError::invalid_state(
                "init_transactions",
                "transactions already initialized",
            ));
        }
        self.backend
            .init_transactions(self.timeouts.transaction)
            .await
            .map_err(|err| self.record_fatal(err))?;
        self.initialized = true;
        info!(transactional_id = %self.transactional_id, "Transactions initialized");
        Ok(())
    }

    pub async fn begin(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(KafkaError::invalid_state(
                "begin_transaction",
                "init_transactions has not completed",
            ));
        }
        if self.is_failed() {
            return Err(KafkaError::transaction(
                "begin_transaction",
                "producer reported a fatal error",
                ErrorClass::Fatal,
            ));
        }
        if self.abort_pending() {
            warn!(transactional_id = %self.transactional_id, "Retrying abort left pending by a previous failure");
            self.abort().await?;
        }
        if self.state.is_open() {
            return Err(KafkaError::invalid_state(
                "begin_transaction",
                format!("transaction already {}", self.state),
            ));
        }

        self.backend
            .begin_transaction()
            .await
            .map_err(|err| self.record_fatal(err))?;
        self.state = TransactionState::Begun;
        self.stats.transactions_begun.fetch_add(1, Ordering::Relaxed);
        debug!(transactional_id = %self.transactional_id, "Transaction begun");
        Ok(())
    }

    /// Produce a batch inside the open transaction and wait for every
    /// delivery report.
    ///
    /// The report channel holds exactly one slot per record. The batch
    /// fails on the first rejected enqueue, on any failed report after all
    /// reports were drained, or when the channel closes early.
    pub async fn produce_batch(&mut self, records: &[OutputRecord]) -> Result<usize> {
        self.require_open("produce_batch")?;
        if records.is_empty() {
            return Ok(0);
        }
        for record in records {
            record.validate()?;
        }

        self.state = TransactionState::Producing;
        let started = Instant::now();
        let expected = records.len();
        let (reports_tx, mut reports_rx) = mpsc::channel(expected);

        for record in records {
            if let Err(err) = self.backend.send(record, reports_tx.clone()) {
                self.state = TransactionState::AbortRequired;
                self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                error!(transactional_id = %self.transactional_id, topic = %record.topic, error = %err, "Failed to enqueue record");
                return Err(err);
            }
        }
        drop(reports_tx);

        let mut first_failure = None;
        for received in 0..expected {
            let Some(report) = reports_rx.recv().await else {
                self.state = TransactionState::AbortRequired;
                error!(
                    transactional_id = %self.transactional_id,
                    expected,
                    received,
                    "Delivery report channel closed"
                );
                return Err(KafkaError::DeliveryChannelClosed { expected, received });
            };
            if let Some(err) = report.error {
                self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transactional_id = %self.transactional_id,
                    topic = %report.topic,
                    partition = ?report.partition,
                    error = %err,
                    "Delivery failed"
                );
                first_failure.get_or_insert(err);
            }
        }

        if let Some(err) = first_failure {
            self.state = TransactionState::AbortRequired;
            return Err(err);
        }

        let bytes: usize = records.iter().map(OutputRecord::size_bytes).sum();
        self.stats
            .records_produced
            .fetch_add(expected as u64, Ordering::Relaxed);
        self.stats
            .bytes_produced
            .fetch_add(bytes as u64, Ordering::Relaxed);
        debug!(
            transactional_id = %self.transactional_id,
            records = expected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch delivered"
        );
        Ok(expected)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.require_open("flush")?;
        if let Err(err) = self.backend.flush(self.timeouts.flush).await {
            self.state = TransactionState::AbortRequired;
            return Err(err);
        }
        Ok(())
    }

    /// Attach consumed offsets to the open transaction.
    ///
    /// An empty position has nothing to commit and is skipped.
    pub async fn send_offsets_to_transaction(
        &mut self,
        position: &ConsumerPosition,
        group: P::GroupMetadata,
    ) -> Result<()> {
        self.require_open("send_offsets_to_transaction")?;
        if position.is_empty() {
            debug!(transactional_id = %self.transactional_id, "No consumer offsets to send");
            return Ok(());
        }

        match self
            .backend
            .send_offsets_to_transaction(position, group, self.timeouts.transaction)
            .await
        {
            Ok(()) => {
                self.state = TransactionState::OffsetsSent;
                debug!(transactional_id = %self.transactional_id, partitions = position.offsets.len(), "Offsets sent to transaction");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::AbortRequired;
                Err(self.record_fatal(err))
            }
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.require_open("commit_transaction")?;
        self.state = TransactionState::Committing;
        match self
            .backend
            .commit_transaction(self.timeouts.transaction)
            .await
        {
            Ok(()) => {
                self.state = TransactionState::Idle;
                self.stats
                    .transactions_committed
                    .fetch_add(1, Ordering::Relaxed);
                debug!(transactional_id = %self.transactional_id, "Transaction committed");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::AbortRequired;
                Err(self.record_fatal(err))
            }
        }
    }

    /// Abort the open transaction.
    ///
    /// An abort rejected because no transaction is in progress means the
    /// broker already resolved it, and counts as success. Any other failure
    /// leaves the abort pending: the next [`handle_failure`](Self::handle_failure)
    /// or [`begin`](Self::begin) retries it.
    pub async fn abort(&mut self) -> Result<AbortOutcome> {
        self.state = TransactionState::Aborting;
        match self
            .backend
            .abort_transaction(self.timeouts.transaction)
            .await
        {
            Ok(()) => {
                self.state = TransactionState::Idle;
                self.stats
                    .transactions_aborted
                    .fetch_add(1, Ordering::Relaxed);
                info!(transactional_id = %self.transactional_id, "Transaction aborted");
                Ok(AbortOutcome::Aborted)
            }
            Err(err) if err.is_no_transaction_in_progress() => {
                self.state = TransactionState::Idle;
                info!(transactional_id = %self.transactional_id, "No transaction in progress, nothing to abort");
                Ok(AbortOutcome::NoTransactionInProgress)
            }
            Err(err) => {
                self.state = TransactionState::AbortRequired;
                error!(transactional_id = %self.transactional_id, error = %err, "Abort failed");
                Err(self.record_fatal(err))
            }
        }
    }

    /// Resolve a failure raised while a transaction may be open.
    ///
    /// Aborts when a transaction is open and the error leaves it abortable,
    /// or when an earlier abort is still pending. A fatal producer error
    /// skips the abort: the broker resolves the transaction when the
    /// identity is re-initialized.
    pub async fn handle_failure(&mut self, err: &KafkaError) -> Result<AbortOutcome> {
        if !self.state.is_open() {
            return Ok(AbortOutcome::NotAttempted);
        }
        if err.is_producer_fatal() || self.is_failed() {
            warn!(transactional_id = %self.transactional_id, error = %err, "Producer failed fatally, skipping abort");
            return Ok(AbortOutcome::NotAttempted);
        }
        if !err.requires_abort() && !self.abort_pending() {
            return Ok(AbortOutcome::NotAttempted);
        }
        self.abort().await
    }

    /// Abort anything still open, flush, then stop and join the client
    /// event listener.
    pub async fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.state.is_open() && !self.is_failed() {
            warn!(transactional_id = %self.transactional_id, state = %self.state, "Closing with an open transaction");
            result = self.abort().await.map(|_| ());
        }
        if !self.is_failed() {
            if let Err(err) = self.backend.flush(self.timeouts.flush).await {
                warn!(transactional_id = %self.transactional_id, error = %err, "Flush on close failed");
            }
        }
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }
        info!(transactional_id = %self.transactional_id, "Producer session closed");
        result
    }

    /// An abort was requested or attempted but has not gone through.
    fn abort_pending(&self) -> bool {
        matches!(
            self.state,
            TransactionState::AbortRequired | TransactionState::Aborting
        ) && !self.is_failed()
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        match self.state {
            TransactionState::Begun
            | TransactionState::Producing
            | TransactionState::OffsetsSent => Ok(()),
            state => Err(KafkaError::invalid_state(
                operation,
                format!("no usable transaction (state {})", state),
            )),
        }
    }

    fn record_fatal(&self, err: KafkaError) -> KafkaError {
        if err.is_producer_fatal() {
            self.failed.store(true, Ordering::SeqCst);
        }
        err
    }
}
