//! Configuration management for eos-bridge
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `EOS_BRIDGE_` (nested keys separated
//! by `__`, e.g. `EOS_BRIDGE_KAFKA__PRODUCER__RETRIES=5`).

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "EOS_BRIDGE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Broker connection and client tuning
    pub kafka: KafkaSettings,

    /// Batching and failure handling for the worker loop
    pub worker: WorkerSettings,

    /// Logging settings
    pub observability: ObservabilitySettings,
}

impl BridgeSettings {
    /// Load configuration from defaults, file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BridgeSettings::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings: BridgeSettings = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.kafka.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

/// Kafka connection settings shared by every client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    /// Broker addresses (host:port)
    pub bootstrap_servers: Vec<String>,

    /// Authentication and transport security
    pub security: SecuritySettings,

    /// Transactional producer tuning
    pub producer: ProducerSettings,

    /// Consumer group tuning
    pub consumer: ConsumerSettings,

    /// Admin client timeouts and topic defaults
    pub admin: AdminSettings,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            security: SecuritySettings::default(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
            admin: AdminSettings::default(),
        }
    }
}

impl KafkaSettings {
    fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.is_empty()
            || self.bootstrap_servers.iter().any(|s| s.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "kafka.bootstrap_servers must list at least one broker".to_string(),
            ));
        }

        if self.security.protocol.to_ascii_uppercase().starts_with("SASL")
            && (self.security.username.is_none() || self.security.password.is_none())
        {
            return Err(ConfigError::ValidationError(
                "kafka.security.username and password are required for SASL".to_string(),
            ));
        }

        if self.producer.transaction_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "kafka.producer.transaction_timeout_ms must be positive".to_string(),
            ));
        }

        if self.consumer.heartbeat_interval_ms >= self.consumer.session_timeout_ms {
            return Err(ConfigError::ValidationError(
                "kafka.consumer.heartbeat_interval_ms must be below session_timeout_ms".to_string(),
            ));
        }

        if self.admin.operation_timeout_ms == 0 || self.admin.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "kafka.admin timeouts must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// `PLAINTEXT`, `SSL`, `SASL_PLAINTEXT` or `SASL_SSL`
    pub protocol: String,

    /// SASL mechanism, e.g. `PLAIN` or `SCRAM-SHA-512`
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub username: Option<String>,

    /// SASL password
    pub password: Option<String>,

    /// CA certificate path for TLS
    pub ssl_ca_location: Option<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            protocol: "PLAINTEXT".to_string(),
            sasl_mechanism: None,
            username: None,
            password: None,
            ssl_ca_location: None,
        }
    }
}

/// Producer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub max_in_flight_requests_per_connection: u32,
    pub message_max_bytes: u32,
    pub transaction_timeout_ms: u64,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_backoff_ms: 100,
            max_in_flight_requests_per_connection: 5,
            message_max_bytes: 10_000_000,
            transaction_timeout_ms: 60_000,
        }
    }
}

/// Consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// `earliest`, `latest` or `error`
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub socket_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 45_000,
            heartbeat_interval_ms: 3_000,
            max_poll_interval_ms: 300_000,
            socket_timeout_ms: 60_000,
        }
    }
}

/// Admin client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    pub operation_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// `retention.ms` for created topics, -1 for unlimited
    pub retention_ms: i64,
    /// `retention.bytes` for created topics, -1 for unlimited
    pub retention_bytes: i64,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            retention_bytes: -1,
        }
    }
}

/// Worker loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Cycle once this many messages are buffered
    pub flush_items: usize,

    /// Cycle once the buffered payload reaches this many MiB
    pub flush_mib: usize,

    /// Cycle once the oldest buffered message is this old
    pub flush_interval_secs: u64,

    /// Consecutive poll failures tolerated before the worker stops
    pub failure_threshold: u32,

    /// Pause between failed polls
    pub retry_interval_ms: u64,

    /// Upper bound for a single poll
    pub poll_timeout_ms: u64,

    /// Topic receiving records the transform rejected
    pub error_topic: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            flush_items: 10_000,
            flush_mib: 5,
            flush_interval_secs: 5,
            failure_threshold: 5,
            retry_interval_ms: 3_000,
            poll_timeout_ms: 100,
            error_topic: None,
        }
    }
}

impl WorkerSettings {
    fn validate(&self) -> Result<()> {
        if self.flush_items == 0 {
            return Err(ConfigError::ValidationError(
                "worker.flush_items must be positive".to_string(),
            ));
        }
        if self.flush_mib == 0 {
            return Err(ConfigError::ValidationError(
                "worker.flush_mib must be positive".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "worker.failure_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level or `EnvFilter` directive
    pub log_level: String,

    /// Enable structured JSON logging
    pub json_logging: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
