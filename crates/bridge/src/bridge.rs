//! The exactly-once read-process-write cycle.
//!
//! One cycle moves a batch of output records and the consumer position that
//! produced them into a single transaction:
//!
//! ```text
//! Idle -> Begun -> Produced -> Flushed -> PositionCaptured -> OffsetsSent -> Committed
//!           \---------\-----------\--------------\-----------------\--> AbortRequired -> Aborted
//! ```
//!
//! Either both the records and the offsets become visible to
//! `read_committed` readers, or neither does.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use eos_bridge_types::{AbortOutcome, ConsumerPosition, CycleState, OutputRecord};

use crate::kafka::consumer::{ConsumerBackend, ConsumerSession};
use crate::kafka::error::{KafkaError, Result as KafkaResult};
use crate::kafka::producer::{ProducerBackend, TransactionalProducerSession};
use crate::status::{CycleFailure, CycleOutcome, CycleReport, CycleStatusSink};

/// Cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub cycles_committed: u64,
    pub cycles_aborted: u64,
    pub cycles_skipped: u64,
    pub records_committed: u64,
    pub status_sink_failures: u64,
}

/// Couples one consumer session with one transactional producer session.
///
/// The bridge owns both sessions; cycles run strictly one after another
/// because every cycle takes `&mut self`.
pub struct ExactlyOnceBridge<C, P> {
    consumer: ConsumerSession<C>,
    producer: TransactionalProducerSession<P>,
    status: Arc<dyn CycleStatusSink>,
    state: CycleState,
    stats: BridgeStats,
}

impl<C, P> ExactlyOnceBridge<C, P>
where
    C: ConsumerBackend,
    P: ProducerBackend<GroupMetadata = C::GroupMetadata>,
{
    pub fn new(
        consumer: ConsumerSession<C>,
        producer: TransactionalProducerSession<P>,
        status: Arc<dyn CycleStatusSink>,
    ) -> Self {
        Self {
            consumer,
            producer,
            status,
            state: CycleState::Idle,
            stats: BridgeStats::default(),
        }
    }

    /// Initialize the producer's transactional identity.
    pub async fn init(&mut self) -> KafkaResult<()> {
        self.producer.init_transactions().await
    }

    pub fn consumer(&self) -> &ConsumerSession<C> {
        &self.consumer
    }

    pub fn producer(&self) -> &TransactionalProducerSession<P> {
        &self.producer
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Produce `batch` and commit the consumer's current position with it.
    ///
    /// Assignment, position and group metadata are read after the records
    /// are delivered, so a rebalance during producing is reflected in the
    /// offsets that get committed. An empty batch opens no transaction.
    pub async fn run_cycle(&mut self, batch: &[OutputRecord]) -> CycleOutcome {
        self.execute(batch, true).await
    }

    /// Produce `batch` in a transaction without committing consumer offsets.
    pub async fn publish(&mut self, batch: &[OutputRecord]) -> CycleOutcome {
        self.execute(batch, false).await
    }

    /// Close the producer (aborting anything open) and leave the group.
    pub async fn close(&mut self) -> KafkaResult<()> {
        let result = self.producer.close().await;
        self.consumer.close();
        result
    }

    async fn execute(&mut self, batch: &[OutputRecord], commit_offsets: bool) -> CycleOutcome {
        if batch.is_empty() {
            debug!(transactional_id = %self.producer.transactional_id(), "Empty batch, skipping cycle");
            self.stats.cycles_skipped += 1;
            return CycleOutcome::Skipped;
        }

        let started_at = Utc::now();
        let outcome = match self.drive(batch, commit_offsets).await {
            Ok(position) => {
                let bytes = batch.iter().map(OutputRecord::size_bytes).sum();
                self.stats.cycles_committed += 1;
                self.stats.records_committed += batch.len() as u64;
                info!(
                    transactional_id = %self.producer.transactional_id(),
                    records = batch.len(),
                    partitions = position.offsets.len(),
                    "Transaction committed"
                );
                CycleOutcome::Committed(CycleReport {
                    transactional_id: self.producer.transactional_id().to_string(),
                    records: batch.len(),
                    bytes,
                    offsets: position
                        .offsets
                        .iter()
                        .map(|(tp, offset)| (tp.to_string(), *offset))
                        .collect(),
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(err) => {
                self.stats.cycles_aborted += 1;
                CycleOutcome::Aborted(self.resolve(err).await)
            }
        };

        if let Err(err) = self.status.record(&outcome).await {
            self.stats.status_sink_failures += 1;
            warn!(
                transactional_id = %self.producer.transactional_id(),
                error = %err,
                "Failed to record cycle status"
            );
        }

        self.state = CycleState::Idle;
        outcome
    }

    async fn drive(&mut self, batch: &[OutputRecord], commit_offsets: bool) -> KafkaResult<ConsumerPosition> {
        self.producer.begin().await?;
        self.advance(CycleState::Begun);

        self.producer.produce_batch(batch).await?;
        self.advance(CycleState::Produced);

        self.producer.flush().await?;
        self.advance(CycleState::Flushed);

        let mut position = ConsumerPosition::default();
        if commit_offsets {
            let assignment = self.consumer.assignment()?;
            position = self.consumer.position(&assignment)?;
            let group = self.consumer.group_metadata()?;
            self.advance(CycleState::PositionCaptured);

            self.producer
                .send_offsets_to_transaction(&position, group)
                .await?;
            self.advance(CycleState::OffsetsSent);
        }

        self.producer.commit().await?;
        self.advance(CycleState::Committed);
        Ok(position)
    }

    async fn resolve(&mut self, err: KafkaError) -> CycleFailure {
        let failed_at = self.state;
        self.advance(CycleState::AbortRequired);
        error!(
            transactional_id = %self.producer.transactional_id(),
            failed_at = %failed_at,
            class = %err.class(),
            error = %err,
            "Cycle failed"
        );

        let (abort, abort_error) = match self.producer.handle_failure(&err).await {
            Ok(outcome) => (outcome, None),
            Err(abort_err) => {
                error!(
                    transactional_id = %self.producer.transactional_id(),
                    error = %abort_err,
                    "Abort failed"
                );
                (AbortOutcome::NotAttempted, Some(abort_err.to_string()))
            }
        };
        self.advance(CycleState::Aborted);

        CycleFailure {
            transactional_id: self.producer.transactional_id().to_string(),
            failed_at,
            class: err.class(),
            error: err.to_string(),
            abort,
            abort_error,
            finished_at: Utc::now(),
        }
    }

    fn advance(&mut self, next: CycleState) {
        debug!(
            transactional_id = %self.producer.transactional_id(),
            from = %self.state,
            to = %next,
            "Cycle transition"
        );
        self.state = next;
    }
}
