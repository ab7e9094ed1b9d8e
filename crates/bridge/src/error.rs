//! Error types for the bridge
//!
//! Kafka failures keep their own classified type ([`KafkaError`]); this
//! module wraps them together with the failures of the code around a cycle.

use thiserror::Error;

use crate::kafka::error::{ErrorSeverity, KafkaError};

/// Main bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Kafka client errors
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// A record transform rejected the whole batch
    #[error("transform error: {message}")]
    Transform { message: String },

    /// The cycle status callback failed
    #[error("status sink error: {message}")]
    StatusSink { message: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cycle ended aborted; input was consumed past the committed offsets
    #[error("cycle aborted: {reason}")]
    CycleAborted { reason: String },

    /// Consecutive poll failures reached the configured threshold
    #[error("giving up after {failures} consecutive poll failures: {last_error}")]
    TooManyFailures { failures: u32, last_error: String },

    /// Shutdown was requested while work was pending
    #[error("shutdown: {0}")]
    Shutdown(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BridgeError {
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    pub fn status_sink(message: impl Into<String>) -> Self {
        Self::StatusSink {
            message: message.into(),
        }
    }

    pub fn cycle_aborted(reason: impl Into<String>) -> Self {
        Self::CycleAborted {
            reason: reason.into(),
        }
    }

    /// Check if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Kafka(err) => err.is_retryable(),
            BridgeError::StatusSink { .. } => true,
            _ => false,
        }
    }

    /// Check if the error should stop the worker.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Kafka(err) => err.is_fatal(),
            BridgeError::Configuration(_)
            | BridgeError::CycleAborted { .. }
            | BridgeError::TooManyFailures { .. } => true,
            _ => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BridgeError::Kafka(err) => err.severity(),
            BridgeError::Configuration(_)
            | BridgeError::CycleAborted { .. }
            | BridgeError::TooManyFailures { .. } => ErrorSeverity::Critical,
            BridgeError::Transform { .. }
            | BridgeError::Serialization(_)
            | BridgeError::Unexpected(_) => ErrorSeverity::Error,
            BridgeError::StatusSink { .. } => ErrorSeverity::Warning,
            BridgeError::Shutdown(_) => ErrorSeverity::Info,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<eos_bridge_config::ConfigError> for BridgeError {
    fn from(err: eos_bridge_config::ConfigError) -> Self {
        BridgeError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Unexpected(err.to_string())
    }
}
