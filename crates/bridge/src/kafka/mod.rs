//! Kafka clients for the bridge
//!
//! Each client is split in two: a backend trait with the raw operations
//! ([`AdminBackend`], [`ConsumerBackend`], [`ProducerBackend`]) implemented
//! over rdkafka, and a session type that adds state tracking, logging and
//! counters on top of any backend.
//!
//! # Example: ensure an output topic
//!
//! ```rust,no_run
//! use eos_bridge::kafka::{AdminConfig, AdminGateway, RdKafkaAdmin};
//! use eos_bridge_types::TopicSpec;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AdminConfig::new(vec!["localhost:9092".to_string()]);
//! let gateway = AdminGateway::new(RdKafkaAdmin::new(config)?);
//!
//! gateway.ensure_topic(&TopicSpec::new("model-metrics", 4)).await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;

#[cfg(test)]
mod tests;

pub use admin::{AdminBackend, AdminGateway, ClusterMetadata, DeletionResult, RdKafkaAdmin};
pub use config::{
    AdminConfig, ConsumerConfig, ConsumerConfigBuilder, ProducerConfig, ProducerConfigBuilder,
    SaslMechanism, SecurityConfig, SecurityProtocol, SslConfig,
};
pub use consumer::{
    BridgeConsumerContext, ConsumerBackend, ConsumerSession, ConsumerStats, ConsumerStatsSnapshot,
    RdKafkaConsumer,
};
pub use error::{ErrorClass, ErrorSeverity, KafkaError, Result};
pub use producer::{
    BridgeProducerContext, ClientEvent, ClientEventListener, DeliveryReport, DeliverySender,
    ProducerBackend, ProducerStats, ProducerStatsSnapshot, RdKafkaProducer, TransactionTimeouts,
    TransactionalProducerSession,
};
