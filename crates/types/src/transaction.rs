//! Transaction and cycle state machines

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the transaction owned by one producer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction open; ready to begin
    Idle,
    /// Transaction opened on the coordinator
    Begun,
    /// Records enqueued, delivery reports pending
    Producing,
    /// Consumer offsets registered with the transaction
    OffsetsSent,
    /// Commit in flight
    Committing,
    /// Last transaction committed
    Committed,
    /// A failure left the transaction needing an abort
    AbortRequired,
    /// Abort in flight
    Aborting,
    /// Last transaction aborted
    Aborted,
}

impl TransactionState {
    /// True while the broker may hold an open transaction for this identity
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TransactionState::Begun
                | TransactionState::Producing
                | TransactionState::OffsetsSent
                | TransactionState::Committing
                | TransactionState::AbortRequired
                | TransactionState::Aborting
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Idle => "idle",
            TransactionState::Begun => "begun",
            TransactionState::Producing => "producing",
            TransactionState::OffsetsSent => "offsets_sent",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::AbortRequired => "abort_required",
            TransactionState::Aborting => "aborting",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Step reached by one read-process-write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Begun,
    Produced,
    Flushed,
    PositionCaptured,
    OffsetsSent,
    Committed,
    AbortRequired,
    Aborted,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Committed | CycleState::Aborted)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleState::Idle => "idle",
            CycleState::Begun => "begun",
            CycleState::Produced => "produced",
            CycleState::Flushed => "flushed",
            CycleState::PositionCaptured => "position_captured",
            CycleState::OffsetsSent => "offsets_sent",
            CycleState::Committed => "committed",
            CycleState::AbortRequired => "abort_required",
            CycleState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// How a failed transaction was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortOutcome {
    /// The abort call succeeded
    Aborted,
    /// The broker had no transaction in progress; it already resolved it
    NoTransactionInProgress,
    /// No abort was issued (nothing open, or the producer is fenced)
    NotAttempted,
}
