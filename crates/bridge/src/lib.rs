//! Exactly-once read-process-write bridge for Kafka
//!
//! This crate couples a `read_committed` consumer with a transactional
//! producer so that output records and the consumer offsets that produced
//! them are committed atomically.
//!
//! - [`kafka`]: admin gateway, consumer session and transactional producer
//!   session, each over a swappable backend
//! - [`bridge`]: the per-cycle state machine ([`ExactlyOnceBridge`])
//! - [`worker`]: a poll-transform-cycle loop ([`BridgeWorker`])
//! - [`status`]: cycle outcomes and the status callback
//! - `testing` (feature `testing`): an in-memory broker implementing every
//!   backend

pub mod bridge;
pub mod error;
pub mod kafka;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use bridge::{BridgeStats, ExactlyOnceBridge};

pub use error::{BridgeError, Result as BridgeResult};

pub use kafka::{
    AdminBackend, AdminConfig, AdminGateway, ConsumerBackend, ConsumerConfig, ConsumerSession,
    ErrorClass, KafkaError, ProducerBackend, ProducerConfig, RdKafkaAdmin, RdKafkaConsumer,
    RdKafkaProducer, TransactionTimeouts, TransactionalProducerSession,
};

pub use status::{CycleFailure, CycleOutcome, CycleReport, CycleStatusSink, LoggingStatusSink};

pub use worker::{
    BatchAccumulator, BridgeWorker, PassthroughTransform, RecordTransform, TransformFailure,
    TransformOutput, WorkerConfig,
};

/// Bridge over the rdkafka clients.
pub type KafkaBridge = ExactlyOnceBridge<RdKafkaConsumer, RdKafkaProducer>;
