//! Kafka-specific error types and error classification.
//!
//! Every error carries an [`ErrorClass`] that drives the bridge's abort
//! decision: transient failures are surfaced to the caller, failures inside
//! an open transaction require an abort, and fatal failures end the cycle
//! (and for a fenced producer, the producer's usefulness).

use rdkafka::error::{RDKafkaError, RDKafkaErrorCode};
use std::fmt;
use thiserror::Error;

/// Result type alias for Kafka operations.
pub type Result<T> = std::result::Result<T, KafkaError>;

/// Coarse classification used by the abort decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The call failed but may succeed if the caller tries again.
    Transient,
    /// The open transaction can no longer commit and must be aborted.
    AbortRequired,
    /// The failure cannot be recovered by this cycle.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::AbortRequired => write!(f, "abort_required"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Error type for Kafka operations.
///
/// # Examples
///
/// ```rust
/// use eos_bridge::kafka::error::{ErrorClass, KafkaError};
///
/// let err = KafkaError::delivery("Message timed out", "model-metrics", Some(3));
/// assert_eq!(err.class(), ErrorClass::AbortRequired);
/// assert!(err.requires_abort());
///
/// let err = KafkaError::invalid_metadata("cluster reported zero brokers");
/// assert!(err.is_fatal());
/// ```
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Error establishing connection to Kafka broker.
    #[error("Failed to connect to Kafka broker {broker}: {message}")]
    Connection {
        /// Error message describing the connection failure.
        message: String,
        /// Broker address that failed to connect.
        broker: String,
    },

    /// Error during message consumption.
    #[error("Failed to consume message: {message}")]
    Consumption {
        /// Error message describing the consumption failure.
        message: String,
        /// Topic from which consumption failed, if known.
        topic: Option<String>,
        /// Partition number if available.
        partition: Option<i32>,
    },

    /// A produced record was rejected or never acknowledged.
    #[error("Failed to deliver record to topic {topic}: {message}")]
    Delivery {
        /// Delivery failure reported by the client.
        message: String,
        /// Topic the record was addressed to.
        topic: String,
        /// Partition, if one was assigned.
        partition: Option<i32>,
    },

    /// The delivery-report channel closed before every report arrived.
    #[error("Delivery report channel closed after {received} of {expected} reports")]
    DeliveryChannelClosed {
        /// Reports the batch was waiting for.
        expected: usize,
        /// Reports received before the channel closed.
        received: usize,
    },

    /// A transaction API call failed on the coordinator or the client.
    #[error("Transaction operation '{operation}' failed ({class}): {message}")]
    Transaction {
        /// Transaction step that failed.
        operation: String,
        /// Error message from the client.
        message: String,
        /// How the failure affects the open transaction.
        class: ErrorClass,
        /// librdkafka error code.
        code: Option<RDKafkaErrorCode>,
    },

    /// A transaction call was made in a state that does not allow it.
    ///
    /// Raised locally for programming errors (begin while open) and by
    /// librdkafka as `_STATE`, e.g. aborting when no transaction exists.
    #[error("Invalid transaction state for '{operation}': {message}")]
    InvalidTransactionState {
        /// Transaction step that was rejected.
        operation: String,
        /// Explanation.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message describing the configuration issue.
        message: String,
        /// Field name that has invalid configuration.
        field: Option<String>,
    },

    /// Error during consumer group coordination.
    #[error("Consumer group coordination error for group {group_id}: {message}")]
    GroupCoordination {
        /// Error message describing the coordination failure.
        message: String,
        /// Consumer group ID.
        group_id: String,
    },

    /// Timeout error during Kafka operations.
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The cluster returned metadata that cannot be acted on.
    #[error("Invalid cluster metadata: {message}")]
    InvalidMetadata {
        /// What was wrong with the metadata.
        message: String,
    },

    /// The named topic does not exist.
    #[error("Topic {topic} does not exist")]
    TopicNotFound {
        /// Topic name.
        topic: String,
    },

    /// Topic creation raced with an existing topic.
    #[error("Topic {topic} already exists")]
    TopicAlreadyExists {
        /// Topic name.
        topic: String,
    },

    /// A partition increase asked for no more partitions than exist.
    #[error("Topic {topic} already has at least {requested} partitions")]
    PartitionsAlreadySufficient {
        /// Topic name.
        topic: String,
        /// Requested total partition count.
        requested: usize,
    },

    /// The consumer group does not exist.
    #[error("Consumer group {group_id} does not exist")]
    GroupNotFound {
        /// Consumer group ID.
        group_id: String,
    },

    /// Any other admin operation failure.
    #[error("Admin operation '{operation}' failed for {target}: {message}")]
    Admin {
        /// Admin operation name.
        operation: String,
        /// Topic or group the operation targeted.
        target: String,
        /// Error message.
        message: String,
        /// librdkafka error code.
        code: Option<RDKafkaErrorCode>,
    },

    /// Authentication or authorization error.
    #[error("Authentication/Authorization error: {message}")]
    AuthError {
        /// Error message describing the auth failure.
        message: String,
        /// Security protocol being used.
        protocol: String,
    },

    /// Error from the underlying rdkafka library.
    #[error("Kafka client error: {message} (error code: {code:?})")]
    KafkaClient {
        /// Error message from rdkafka.
        message: String,
        /// rdkafka error code.
        code: Option<RDKafkaErrorCode>,
    },

    /// Generic error for cases not covered by specific variants.
    #[error("Kafka error: {0}")]
    Other(String),
}

impl KafkaError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>, broker: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            broker: broker.into(),
        }
    }

    /// Create a consumption error.
    pub fn consumption(
        message: impl Into<String>,
        topic: Option<String>,
        partition: Option<i32>,
    ) -> Self {
        Self::Consumption {
            message: message.into(),
            topic,
            partition,
        }
    }

    /// Create a per-record delivery error.
    pub fn delivery(
        message: impl Into<String>,
        topic: impl Into<String>,
        partition: Option<i32>,
    ) -> Self {
        Self::Delivery {
            message: message.into(),
            topic: topic.into(),
            partition,
        }
    }

    /// Create a transaction error with an explicit class.
    pub fn transaction(
        operation: impl Into<String>,
        message: impl Into<String>,
        class: ErrorClass,
    ) -> Self {
        Self::Transaction {
            operation: operation.into(),
            message: message.into(),
            class,
            code: None,
        }
    }

    /// Create an invalid transaction state error.
    pub fn invalid_state(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTransactionState {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>, field: Option<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            field,
        }
    }

    /// Create a group coordination error.
    pub fn group_coordination(message: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::GroupCoordination {
            message: message.into(),
            group_id: group_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// Create an admin error.
    pub fn admin(
        operation: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
        code: Option<RDKafkaErrorCode>,
    ) -> Self {
        Self::Admin {
            operation: operation.into(),
            target: target.into(),
            message: message.into(),
            code,
        }
    }

    /// Create an authentication/authorization error.
    pub fn auth_error(message: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
            protocol: protocol.into(),
        }
    }

    /// Create a Kafka client error.
    pub fn kafka_client(message: impl Into<String>, code: Option<RDKafkaErrorCode>) -> Self {
        Self::KafkaClient {
            message: message.into(),
            code,
        }
    }

    /// Classify a librdkafka transactional error raised by `operation`.
    ///
    /// `_STATE` becomes [`KafkaError::InvalidTransactionState`]; otherwise the
    /// error's own flags decide the class, with fatal taking precedence over
    /// abortable and abortable over retriable.
    pub fn from_transaction_error(operation: &str, err: &RDKafkaError) -> Self {
        if err.code() == RDKafkaErrorCode::State {
            return Self::invalid_state(operation, err.string());
        }

        let class = if err.is_fatal() {
            ErrorClass::Fatal
        } else if err.txn_requires_abort() {
            ErrorClass::AbortRequired
        } else if err.is_retriable() {
            ErrorClass::Transient
        } else {
            // Non-retriable, non-fatal errors on a transaction call leave the
            // transaction unusable.
            ErrorClass::AbortRequired
        };

        Self::Transaction {
            operation: operation.to_string(),
            message: err.string(),
            class,
            code: Some(err.code()),
        }
    }

    /// Classify an rdkafka error raised by a transactional call.
    pub fn from_transactional_call(operation: &str, err: rdkafka::error::KafkaError) -> Self {
        match err {
            rdkafka::error::KafkaError::Transaction(ref rd) => {
                Self::from_transaction_error(operation, rd)
            }
            other => {
                let converted = KafkaError::from(other);
                match converted {
                    KafkaError::KafkaClient { message, code } => Self::Transaction {
                        operation: operation.to_string(),
                        message,
                        class: ErrorClass::Transient,
                        code,
                    },
                    converted => converted,
                }
            }
        }
    }

    /// How this error affects the current cycle.
    pub fn class(&self) -> ErrorClass {
        match self {
            KafkaError::Transaction { class, .. } => *class,
            KafkaError::Delivery { .. } => ErrorClass::AbortRequired,
            KafkaError::DeliveryChannelClosed { .. }
            | KafkaError::InvalidTransactionState { .. }
            | KafkaError::InvalidConfiguration { .. }
            | KafkaError::InvalidMetadata { .. }
            | KafkaError::AuthError { .. } => ErrorClass::Fatal,
            KafkaError::Connection { .. }
            | KafkaError::Consumption { .. }
            | KafkaError::GroupCoordination { .. }
            | KafkaError::Timeout { .. }
            | KafkaError::TopicNotFound { .. }
            | KafkaError::TopicAlreadyExists { .. }
            | KafkaError::PartitionsAlreadySufficient { .. }
            | KafkaError::GroupNotFound { .. }
            | KafkaError::Admin { .. }
            | KafkaError::KafkaClient { .. }
            | KafkaError::Other(_) => ErrorClass::Transient,
        }
    }

    /// True when the producer itself is unusable (fenced or fatally failed).
    ///
    /// librdkafka refuses further transaction calls on such a producer, so
    /// no abort can be issued; the broker resolves the transaction when the
    /// identity is re-initialized or the transaction times out.
    pub fn is_producer_fatal(&self) -> bool {
        matches!(
            self,
            KafkaError::Transaction {
                class: ErrorClass::Fatal,
                ..
            }
        )
    }

    /// True when the failure leaves an open transaction that must be aborted.
    ///
    /// Once a transaction is open every failure is resolved by aborting it,
    /// except a fatal producer error (no abort is possible) and an invalid
    /// state error (no transaction is open).
    pub fn requires_abort(&self) -> bool {
        !self.is_producer_fatal() && !matches!(self, KafkaError::InvalidTransactionState { .. })
    }

    /// True when an abort failed only because nothing was in progress.
    pub fn is_no_transaction_in_progress(&self) -> bool {
        matches!(self, KafkaError::InvalidTransactionState { .. })
    }

    /// Check if the error is retryable.
    ///
    /// Returns `true` if the operation that caused this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Check if the error is fatal for the current cycle.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Get error severity level.
    ///
    /// Returns a severity level suitable for logging and monitoring.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            KafkaError::InvalidConfiguration { .. }
            | KafkaError::AuthError { .. }
            | KafkaError::InvalidMetadata { .. }
            | KafkaError::DeliveryChannelClosed { .. } => ErrorSeverity::Critical,
            KafkaError::Transaction { class, .. } => match class {
                ErrorClass::Fatal => ErrorSeverity::Critical,
                ErrorClass::AbortRequired => ErrorSeverity::Error,
                ErrorClass::Transient => ErrorSeverity::Warning,
            },
            KafkaError::Connection { .. }
            | KafkaError::GroupCoordination { .. }
            | KafkaError::Delivery { .. }
            | KafkaError::InvalidTransactionState { .. }
            | KafkaError::Admin { .. } => ErrorSeverity::Error,
            KafkaError::Timeout { .. } | KafkaError::Consumption { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational messages.
    Info,
    /// Warning messages for potential issues.
    Warning,
    /// Error messages for failures.
    Error,
    /// Critical errors requiring immediate attention.
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<eos_bridge_types::ModelError> for KafkaError {
    fn from(err: eos_bridge_types::ModelError) -> Self {
        match err {
            eos_bridge_types::ModelError::InvalidBrokerCount(count) => {
                KafkaError::invalid_metadata(format!("cluster reported {} brokers", count))
            }
            other => KafkaError::invalid_config(other.to_string(), None),
        }
    }
}

// Conversion from rdkafka errors
impl From<rdkafka::error::KafkaError> for KafkaError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError as RdKafkaError;

        match err {
            RdKafkaError::ClientCreation(msg) => KafkaError::invalid_config(msg, None),

            RdKafkaError::ClientConfig(_, ref msg, ref key, _) => {
                KafkaError::invalid_config(msg.clone(), Some(key.clone()))
            }

            RdKafkaError::Transaction(ref rd) => KafkaError::from_transaction_error("transaction", rd),

            RdKafkaError::MessageProduction(code) => KafkaError::delivery(
                format!("Message production failed: {}", code),
                "unknown",
                None,
            ),

            RdKafkaError::MessageConsumption(code) => KafkaError::consumption(
                format!("Message consumption failed: {}", code),
                None,
                None,
            ),

            RdKafkaError::PartitionEOF(partition) => KafkaError::consumption(
                format!("Reached end of partition {}", partition),
                None,
                Some(partition),
            ),

            RdKafkaError::Flush(code)
                if matches!(
                    code,
                    RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::MessageTimedOut
                ) =>
            {
                KafkaError::timeout("flush", 0)
            }

            RdKafkaError::AdminOp(code) => {
                KafkaError::admin("admin", "unknown", code.to_string(), Some(code))
            }

            RdKafkaError::MetadataFetch(code) => {
                KafkaError::kafka_client(format!("Metadata fetch failed: {}", code), Some(code))
            }

            RdKafkaError::Subscription(msg) => KafkaError::consumption(msg, None, None),

            _ => {
                let code = err.rdkafka_error_code();
                KafkaError::kafka_client(err.to_string(), code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KafkaError::connection("Connection refused", "localhost:9092");
        assert!(matches!(err, KafkaError::Connection { .. }));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            KafkaError::delivery("timed out", "t", None).class(),
            ErrorClass::AbortRequired
        );
        assert_eq!(
            KafkaError::DeliveryChannelClosed {
                expected: 5,
                received: 2
            }
            .class(),
            ErrorClass::Fatal
        );
        assert_eq!(KafkaError::timeout("commit", 1000).class(), ErrorClass::Transient);
        assert_eq!(
            KafkaError::invalid_metadata("zero brokers").class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_abort_decision() {
        let abortable = KafkaError::transaction("commit", "abortable", ErrorClass::AbortRequired);
        assert!(abortable.requires_abort());

        let transient = KafkaError::transaction("commit", "coordinator loading", ErrorClass::Transient);
        assert!(transient.requires_abort());

        let closed = KafkaError::DeliveryChannelClosed {
            expected: 3,
            received: 1,
        };
        assert!(closed.requires_abort());

        let fenced = KafkaError::transaction("commit", "producer fenced", ErrorClass::Fatal);
        assert!(fenced.is_producer_fatal());
        assert!(!fenced.requires_abort());

        let no_txn = KafkaError::invalid_state("abort", "no transaction in progress");
        assert!(!no_txn.requires_abort());
        assert!(no_txn.is_no_transaction_in_progress());
    }

    #[test]
    fn test_error_is_retryable() {
        let timeout_err = KafkaError::timeout("poll", 1000);
        assert!(timeout_err.is_retryable());

        let auth_err = KafkaError::auth_error("Invalid credentials", "SASL_SSL");
        assert!(!auth_err.is_retryable());
    }

    #[test]
    fn test_error_is_fatal() {
        let auth_err = KafkaError::auth_error("Invalid credentials", "SASL_SSL");
        assert!(auth_err.is_fatal());

        let timeout_err = KafkaError::timeout("poll", 1000);
        assert!(!timeout_err.is_fatal());
    }

    #[test]
    fn test_error_severity() {
        let critical = KafkaError::invalid_config("Missing bootstrap servers", None);
        assert_eq!(critical.severity(), ErrorSeverity::Critical);

        let error = KafkaError::delivery("Message timed out", "t", Some(0));
        assert_eq!(error.severity(), ErrorSeverity::Error);

        let warning = KafkaError::timeout("poll", 1000);
        assert_eq!(warning.severity(), ErrorSeverity::Warning);

        let fenced = KafkaError::transaction("begin", "fenced", ErrorClass::Fatal);
        assert_eq!(fenced.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_rdkafka_production_error_conversion() {
        let err: KafkaError =
            rdkafka::error::KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut).into();
        assert!(matches!(err, KafkaError::Delivery { .. }));
        assert!(err.requires_abort());
    }

    #[test]
    fn test_rdkafka_flush_timeout_conversion() {
        let err: KafkaError =
            rdkafka::error::KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut).into();
        assert!(matches!(err, KafkaError::Timeout { .. }));
    }

    #[test]
    fn test_broker_count_model_error_conversion() {
        let err: KafkaError = eos_bridge_types::ModelError::InvalidBrokerCount(0).into();
        assert!(matches!(err, KafkaError::InvalidMetadata { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = KafkaError::connection("Connection refused", "localhost:9092");
        let display = format!("{}", err);
        assert!(display.contains("localhost:9092"));
        assert!(display.contains("Connection refused"));
    }
}
