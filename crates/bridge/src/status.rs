//! Cycle outcomes and the callback that persists them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use eos_bridge_types::{AbortOutcome, CycleState};

use crate::error::Result;
use crate::kafka::error::ErrorClass;

/// Result of a committed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Transactional identity that ran the cycle
    pub transactional_id: String,
    /// Records produced inside the transaction
    pub records: usize,
    /// Approximate payload bytes produced
    pub bytes: usize,
    /// Committed next-offset per `topic[partition]`; empty for produce-only cycles
    pub offsets: BTreeMap<String, i64>,
    /// When the transaction began
    pub started_at: DateTime<Utc>,
    /// When the cycle reached its terminal state
    pub finished_at: DateTime<Utc>,
}

/// Result of an aborted cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleFailure {
    /// Transactional identity that ran the cycle
    pub transactional_id: String,
    /// Last step reached before the failure
    pub failed_at: CycleState,
    /// Class of the failure
    #[serde(serialize_with = "serialize_class")]
    pub class: ErrorClass,
    /// Failure description
    pub error: String,
    /// How the transaction was resolved
    pub abort: AbortOutcome,
    /// Abort failure, if the abort itself failed
    pub abort_error: Option<String>,
    /// When the cycle reached its terminal state
    pub finished_at: DateTime<Utc>,
}

fn serialize_class<S: serde::Serializer>(class: &ErrorClass, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&class.to_string())
}

/// Terminal result of [`ExactlyOnceBridge::run_cycle`](crate::ExactlyOnceBridge::run_cycle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Records and offsets became visible together
    Committed(CycleReport),
    /// Nothing from the cycle became visible
    Aborted(CycleFailure),
    /// Empty batch; no transaction was opened
    Skipped,
}

impl CycleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, CycleOutcome::Aborted(_))
    }

    /// Terminal cycle state; `Skipped` never left `Idle`.
    pub fn state(&self) -> CycleState {
        match self {
            CycleOutcome::Committed(_) => CycleState::Committed,
            CycleOutcome::Aborted(_) => CycleState::Aborted,
            CycleOutcome::Skipped => CycleState::Idle,
        }
    }
}

/// Persists the outcome of every non-empty cycle.
///
/// Called exactly once per cycle, after the transaction is resolved. A
/// failing sink is logged by the bridge and never changes the outcome.
#[async_trait]
pub trait CycleStatusSink: Send + Sync {
    async fn record(&self, outcome: &CycleOutcome) -> Result<()>;
}

#[async_trait]
impl<T: CycleStatusSink + ?Sized> CycleStatusSink for Arc<T> {
    async fn record(&self, outcome: &CycleOutcome) -> Result<()> {
        (**self).record(outcome).await
    }
}

/// Status sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusSink;

#[async_trait]
impl CycleStatusSink for LoggingStatusSink {
    async fn record(&self, outcome: &CycleOutcome) -> Result<()> {
        match outcome {
            CycleOutcome::Committed(report) => info!(
                transactional_id = %report.transactional_id,
                records = report.records,
                partitions = report.offsets.len(),
                "Cycle committed"
            ),
            CycleOutcome::Aborted(failure) => error!(
                transactional_id = %failure.transactional_id,
                failed_at = %failure.failed_at,
                class = %failure.class,
                abort = ?failure.abort,
                "Cycle aborted: {}",
                failure.error
            ),
            CycleOutcome::Skipped => {}
        }
        Ok(())
    }
}
