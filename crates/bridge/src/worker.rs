//! Poll-transform-cycle loop around an [`ExactlyOnceBridge`].
//!
//! The worker buffers consumed messages until a size, byte or age threshold
//! is reached, transforms the buffer into output records and runs one
//! exactly-once cycle for it.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use eos_bridge_config::WorkerSettings;
use eos_bridge_types::{ConsumedMessage, OutputRecord};

use crate::bridge::{BridgeStats, ExactlyOnceBridge};
use crate::error::{BridgeError, Result};
use crate::kafka::consumer::ConsumerBackend;
use crate::kafka::producer::ProducerBackend;
use crate::status::CycleOutcome;

/// Header carrying the transform failure on error-topic records.
pub const ERROR_HEADER: &str = "x-error";
/// Header carrying the input topic on error-topic records.
pub const SOURCE_TOPIC_HEADER: &str = "x-source-topic";
/// Header carrying the input partition on error-topic records.
pub const SOURCE_PARTITION_HEADER: &str = "x-source-partition";
/// Header carrying the input offset on error-topic records.
pub const SOURCE_OFFSET_HEADER: &str = "x-source-offset";

/// Worker loop thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Upper bound for a single poll
    pub poll_timeout: Duration,
    /// Cycle once this many messages are buffered
    pub flush_items: usize,
    /// Cycle once the buffered payload reaches this many bytes
    pub flush_bytes: usize,
    /// Cycle once the oldest buffered message is this old
    pub flush_interval: Duration,
    /// Consecutive poll failures tolerated
    pub failure_threshold: u32,
    /// Pause after a failed poll
    pub retry_interval: Duration,
    /// Topic receiving inputs the transform rejected
    pub error_topic: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            flush_items: settings.flush_items,
            flush_bytes: settings.flush_mib * 1024 * 1024,
            flush_interval: Duration::from_secs(settings.flush_interval_secs),
            failure_threshold: settings.failure_threshold,
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
            error_topic: settings.error_topic.clone(),
        }
    }
}

/// An input the transform could not turn into output.
#[derive(Debug, Clone)]
pub struct TransformFailure {
    pub message: ConsumedMessage,
    pub error: String,
}

/// Records produced from one buffer, plus the inputs that failed.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub records: Vec<OutputRecord>,
    pub failures: Vec<TransformFailure>,
}

/// Turns a buffer of consumed messages into output records.
///
/// Returning `Err` rejects the whole buffer and stops the worker; per-input
/// problems belong in [`TransformOutput::failures`].
#[async_trait]
pub trait RecordTransform: Send + Sync + Debug {
    async fn transform(&self, batch: &[ConsumedMessage]) -> Result<TransformOutput>;

    fn name(&self) -> &str;
}

/// Copies key, value and headers of every input to a fixed topic.
///
/// Tombstones stay tombstones.
#[derive(Debug, Clone)]
pub struct PassthroughTransform {
    output_topic: String,
}

impl PassthroughTransform {
    pub fn new(output_topic: impl Into<String>) -> Self {
        Self {
            output_topic: output_topic.into(),
        }
    }
}

#[async_trait]
impl RecordTransform for PassthroughTransform {
    async fn transform(&self, batch: &[ConsumedMessage]) -> Result<TransformOutput> {
        let records = batch
            .iter()
            .map(|message| OutputRecord {
                topic: self.output_topic.clone(),
                partition: None,
                partition_key: message.key.clone(),
                value: message.payload.clone(),
                headers: message.headers.clone(),
            })
            .collect();
        Ok(TransformOutput {
            records,
            failures: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Consumed messages waiting for the next cycle.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    messages: Vec<ConsumedMessage>,
    bytes: usize,
    started: Option<Instant>,
}

impl BatchAccumulator {
    pub fn push(&mut self, message: ConsumedMessage) {
        self.started.get_or_insert_with(Instant::now);
        self.bytes += message.size_bytes();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// True when any flush threshold is reached.
    pub fn should_flush(&self, config: &WorkerConfig) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.messages.len() >= config.flush_items
            || self.bytes >= config.flush_bytes
            || self
                .started
                .is_some_and(|started| started.elapsed() >= config.flush_interval)
    }

    pub fn take(&mut self) -> Vec<ConsumedMessage> {
        self.bytes = 0;
        self.started = None;
        std::mem::take(&mut self.messages)
    }
}

/// Record routed to the error topic for a rejected input.
pub fn error_record(topic: &str, failure: &TransformFailure) -> OutputRecord {
    let message = &failure.message;
    let mut record = OutputRecord::new(topic, Vec::new())
        .with_header(ERROR_HEADER, failure.error.clone())
        .with_header(SOURCE_TOPIC_HEADER, message.topic.clone())
        .with_header(SOURCE_PARTITION_HEADER, message.partition.to_string())
        .with_header(SOURCE_OFFSET_HEADER, message.offset.to_string());
    record.partition_key = message.key.clone();
    record.value = message.payload.clone();
    record
}

/// Drives one bridge until shutdown or an unrecoverable failure.
pub struct BridgeWorker<C, P, T> {
    bridge: ExactlyOnceBridge<C, P>,
    transform: T,
    config: WorkerConfig,
    batch: BatchAccumulator,
}

impl<C, P, T> BridgeWorker<C, P, T>
where
    C: ConsumerBackend,
    P: ProducerBackend<GroupMetadata = C::GroupMetadata>,
    T: RecordTransform,
{
    pub fn new(bridge: ExactlyOnceBridge<C, P>, transform: T, config: WorkerConfig) -> Self {
        Self {
            bridge,
            transform,
            config,
            batch: BatchAccumulator::default(),
        }
    }

    pub fn bridge(&self) -> &ExactlyOnceBridge<C, P> {
        &self.bridge
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The bridge must already be initialized and its consumer subscribed.
    /// On shutdown the pending buffer is cycled before both sessions are
    /// closed. The sessions are closed on the error paths as well.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<BridgeStats> {
        info!(
            transactional_id = %self.bridge.producer().transactional_id(),
            transform = self.transform.name(),
            "Worker started"
        );

        let result = self.run_loop(shutdown).await;
        let closed = self.bridge.close().await;
        result?;
        closed?;

        let stats = self.bridge.stats();
        info!(
            transactional_id = %self.bridge.producer().transactional_id(),
            committed = stats.cycles_committed,
            records = stats.records_committed,
            "Worker stopped"
        );
        Ok(stats)
    }

    async fn run_loop(&mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut failures = 0u32;

        // A poll is never cancelled: the consumer position already covers a
        // message once it was polled.
        while !shutdown_requested(&shutdown) {
            match self.bridge.consumer().poll(self.config.poll_timeout).await {
                Ok(Some(message)) => {
                    failures = 0;
                    self.batch.push(message);
                }
                Ok(None) => failures = 0,
                Err(err) => {
                    failures += 1;
                    warn!(
                        failures,
                        threshold = self.config.failure_threshold,
                        error = %err,
                        "Poll failed"
                    );
                    if failures >= self.config.failure_threshold {
                        return Err(BridgeError::TooManyFailures {
                            failures,
                            last_error: err.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.retry_interval).await;
                    continue;
                }
            }

            if self.batch.should_flush(&self.config) {
                self.flush().await?;
            }
        }

        info!("Shutdown requested, flushing pending batch");
        self.flush().await
    }

    /// Transform the buffer and commit it with the consumer position.
    async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let bytes = self.batch.bytes();
        let messages = self.batch.take();
        debug!(messages = messages.len(), bytes, "Flushing batch");

        let output = self.transform.transform(&messages).await?;
        let mut records = output.records;
        for failure in &output.failures {
            match &self.config.error_topic {
                Some(topic) => records.push(error_record(topic, failure)),
                None => warn!(
                    topic = %failure.message.topic,
                    partition = failure.message.partition,
                    offset = failure.message.offset,
                    error = %failure.error,
                    "Dropping rejected input, no error topic configured"
                ),
            }
        }

        match self.bridge.run_cycle(&records).await {
            CycleOutcome::Committed(_) | CycleOutcome::Skipped => Ok(()),
            CycleOutcome::Aborted(failure) => {
                error!(
                    failed_at = %failure.failed_at,
                    abort = ?failure.abort,
                    "Cycle aborted, stopping worker"
                );
                Err(BridgeError::cycle_aborted(failure.error))
            }
        }
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
