//! Core types and data models for eos-bridge
//!
//! This crate provides the data structures shared by the bridge library,
//! the configuration layer and the CLI: output records, consumed messages,
//! topic specifications, consumer positions and transaction states.

pub mod errors;
pub mod position;
pub mod records;
pub mod topics;
pub mod transaction;

pub use errors::{ModelError, Result};
pub use position::ConsumerPosition;
pub use records::{ConsumedMessage, OutputRecord, TopicPartition};
pub use topics::{ReplicationPolicy, TopicMetadata, TopicSpec};
pub use transaction::{AbortOutcome, CycleState, TransactionState};
