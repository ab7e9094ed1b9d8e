//! Kafka configuration structures for the producer, consumer and admin clients.
//!
//! Each client gets its own typed configuration. The transactional guarantees
//! the bridge depends on (`acks=all`, idempotence, `read_committed`, manual
//! offsets) are not configurable: they are always rendered into the client
//! properties.

use eos_bridge_config::{BridgeSettings, SecuritySettings};
use eos_bridge_types::TopicSpec;
use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use super::error::{KafkaError, Result};

/// Transactional producer configuration.
///
/// # Examples
///
/// ```rust
/// use eos_bridge::kafka::config::ProducerConfig;
/// use std::time::Duration;
///
/// let config = ProducerConfig::builder()
///     .bootstrap_servers(vec!["localhost:9092".to_string()])
///     .transactional_id("model-job-42_input-events".to_string())
///     .transaction_timeout(Duration::from_secs(60))
///     .build()
///     .expect("valid configuration");
///
/// let props = config.to_rdkafka_properties();
/// assert_eq!(props["acks"], "all");
/// assert_eq!(props["client.id"], "model-job-42_input-events");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Kafka broker addresses (host:port).
    pub bootstrap_servers: Vec<String>,

    /// Transactional identity, also used as `client.id`.
    ///
    /// Must be stable across restarts so the coordinator can fence and
    /// abort transactions left open by a previous incarnation.
    pub transactional_id: String,

    /// Retries for a failed produce request.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Backoff between produce retries.
    #[serde(default = "default_retry_backoff", with = "duration_millis")]
    pub retry_backoff: Duration,

    /// Maximum unacknowledged requests per connection (at most 5 with idempotence).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_requests_per_connection: u32,

    /// Maximum request size.
    #[serde(default = "default_message_max_bytes")]
    pub message_max_bytes: u32,

    /// Coordinator-side transaction timeout.
    ///
    /// Also bounds each blocking transaction call (init, commit, abort,
    /// send-offsets) individually.
    #[serde(default = "default_transaction_timeout", with = "duration_millis")]
    pub transaction_timeout: Duration,

    /// Upper bound for a flush before commit.
    #[serde(default = "default_flush_timeout", with = "duration_millis")]
    pub flush_timeout: Duration,

    /// Authentication and transport settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Extra librdkafka properties, applied before the fixed ones.
    #[serde(default)]
    pub additional_properties: HashMap<String, String>,
}

/// Consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Kafka broker addresses (host:port).
    pub bootstrap_servers: Vec<String>,

    /// Consumer group ID.
    pub group_id: String,

    /// What to do when there is no committed offset: "earliest", "latest", "error".
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Session timeout for group membership.
    #[serde(default = "default_session_timeout", with = "duration_millis")]
    pub session_timeout: Duration,

    /// Heartbeat interval for group membership.
    #[serde(default = "default_heartbeat_interval", with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Maximum time between polls before the member is evicted.
    #[serde(default = "default_max_poll_interval", with = "duration_millis")]
    pub max_poll_interval: Duration,

    /// Network request timeout.
    #[serde(default = "default_socket_timeout", with = "duration_millis")]
    pub socket_timeout: Duration,

    /// Authentication and transport settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Extra librdkafka properties, applied before the fixed ones.
    #[serde(default)]
    pub additional_properties: HashMap<String, String>,
}

/// Admin client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Kafka broker addresses (host:port).
    pub bootstrap_servers: Vec<String>,

    /// Broker-side timeout for create/delete operations.
    #[serde(default = "default_admin_timeout", with = "duration_millis")]
    pub operation_timeout: Duration,

    /// Client-side timeout for each admin request.
    #[serde(default = "default_admin_timeout", with = "duration_millis")]
    pub request_timeout: Duration,

    /// Default `retention.ms` for topics created without an explicit value.
    #[serde(default = "default_retention")]
    pub retention_ms: i64,

    /// Default `retention.bytes` for topics created without an explicit value.
    #[serde(default = "default_retention")]
    pub retention_bytes: i64,

    /// Authentication and transport settings.
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Authentication and transport security settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security protocol.
    #[serde(default)]
    pub protocol: SecurityProtocol,

    /// SASL mechanism (required for SASL protocols).
    pub sasl_mechanism: Option<SaslMechanism>,

    /// SASL username.
    pub sasl_username: Option<String>,

    /// SASL password.
    pub sasl_password: Option<String>,

    /// TLS settings.
    pub ssl: Option<SslConfig>,
}

/// Security protocol for Kafka connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    /// Plaintext connection (no encryption).
    #[default]
    Plaintext,
    /// SSL/TLS encryption.
    Ssl,
    /// SASL authentication over plaintext.
    SaslPlaintext,
    /// SASL authentication over SSL/TLS.
    SaslSsl,
}

impl SecurityProtocol {
    /// Convert to rdkafka string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

impl FromStr for SecurityProtocol {
    type Err = KafkaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(SecurityProtocol::Plaintext),
            "SSL" => Ok(SecurityProtocol::Ssl),
            "SASL_PLAINTEXT" => Ok(SecurityProtocol::SaslPlaintext),
            "SASL_SSL" => Ok(SecurityProtocol::SaslSsl),
            other => Err(KafkaError::invalid_config(
                format!("unknown security protocol: {}", other),
                Some("security.protocol".to_string()),
            )),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslMechanism {
    /// PLAIN authentication.
    #[serde(rename = "PLAIN")]
    Plain,
    /// SCRAM-SHA-256 authentication.
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    /// SCRAM-SHA-512 authentication.
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Convert to rdkafka string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = KafkaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            other => Err(KafkaError::invalid_config(
                format!("unsupported SASL mechanism: {}", other),
                Some("sasl.mechanism".to_string()),
            )),
        }
    }
}

/// SSL/TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    /// Path to CA certificate file.
    pub ca_location: Option<String>,

    /// Path to client certificate file.
    pub certificate_location: Option<String>,

    /// Path to client private key file.
    pub key_location: Option<String>,

    /// Password for private key.
    pub key_password: Option<String>,
}

// Default value functions
fn default_retries() -> u32 {
    10
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_in_flight() -> u32 {
    5
}

fn default_message_max_bytes() -> u32 {
    10_000_000
}

fn default_transaction_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_max_poll_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_admin_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retention() -> i64 {
    -1
}

// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

fn validate_servers(servers: &[String]) -> Result<()> {
    if servers.is_empty() || servers.iter().any(|s| s.trim().is_empty()) {
        return Err(KafkaError::invalid_config(
            "bootstrap_servers cannot be empty",
            Some("bootstrap_servers".to_string()),
        ));
    }
    Ok(())
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

impl SecurityConfig {
    /// Build security settings from the string-typed application settings.
    pub fn from_settings(settings: &SecuritySettings) -> Result<Self> {
        let protocol = settings.protocol.parse::<SecurityProtocol>()?;
        let sasl_mechanism = match &settings.sasl_mechanism {
            Some(mechanism) => Some(mechanism.parse::<SaslMechanism>()?),
            None if protocol.uses_sasl() => Some(SaslMechanism::Plain),
            None => None,
        };
        let ssl = settings.ssl_ca_location.as_ref().map(|ca| SslConfig {
            ca_location: Some(ca.clone()),
            ..SslConfig::default()
        });

        Ok(Self {
            protocol,
            sasl_mechanism,
            sasl_username: settings.username.clone(),
            sasl_password: settings.password.clone(),
            ssl,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a SASL protocol is selected without a mechanism,
    /// username and password.
    pub fn validate(&self) -> Result<()> {
        if self.protocol.uses_sasl() {
            if self.sasl_mechanism.is_none() {
                return Err(KafkaError::invalid_config(
                    "sasl_mechanism required when using SASL security protocol",
                    Some("sasl_mechanism".to_string()),
                ));
            }
            if self.sasl_username.is_none() {
                return Err(KafkaError::invalid_config(
                    "sasl_username required when using SASL security protocol",
                    Some("sasl_username".to_string()),
                ));
            }
            if self.sasl_password.is_none() {
                return Err(KafkaError::invalid_config(
                    "sasl_password required when using SASL security protocol",
                    Some("sasl_password".to_string()),
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, props: &mut HashMap<String, String>) {
        props.insert(
            "security.protocol".to_string(),
            self.protocol.as_str().to_string(),
        );

        if self.protocol.uses_sasl() {
            if let Some(mechanism) = self.sasl_mechanism {
                props.insert("sasl.mechanism".to_string(), mechanism.as_str().to_string());
            }
            if let Some(ref username) = self.sasl_username {
                props.insert("sasl.username".to_string(), username.clone());
            }
            if let Some(ref password) = self.sasl_password {
                props.insert("sasl.password".to_string(), password.clone());
            }
        }

        if let Some(ref ssl) = self.ssl {
            if let Some(ref ca) = ssl.ca_location {
                props.insert("ssl.ca.location".to_string(), ca.clone());
            }
            if let Some(ref cert) = ssl.certificate_location {
                props.insert("ssl.certificate.location".to_string(), cert.clone());
            }
            if let Some(ref key) = ssl.key_location {
                props.insert("ssl.key.location".to_string(), key.clone());
            }
            if let Some(ref password) = ssl.key_password {
                props.insert("ssl.key.password".to_string(), password.clone());
            }
        }
    }
}

/// Render properties into an rdkafka client configuration.
pub fn client_config(props: &HashMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in props {
        config.set(key, value);
    }
    config
}

impl ProducerConfig {
    /// Create a new builder for ProducerConfig.
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    /// Build a producer configuration for one transactional identity.
    pub fn from_settings(settings: &BridgeSettings, transactional_id: impl Into<String>) -> Result<Self> {
        let kafka = &settings.kafka;
        let config = Self {
            bootstrap_servers: kafka.bootstrap_servers.clone(),
            transactional_id: transactional_id.into(),
            retries: kafka.producer.retries,
            retry_backoff: Duration::from_millis(kafka.producer.retry_backoff_ms),
            max_in_flight_requests_per_connection: kafka.producer.max_in_flight_requests_per_connection,
            message_max_bytes: kafka.producer.message_max_bytes,
            transaction_timeout: Duration::from_millis(kafka.producer.transaction_timeout_ms),
            flush_timeout: default_flush_timeout(),
            security: SecurityConfig::from_settings(&kafka.security)?,
            additional_properties: HashMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_servers(&self.bootstrap_servers)?;

        if self.transactional_id.trim().is_empty() {
            return Err(KafkaError::invalid_config(
                "transactional_id cannot be empty",
                Some("transactional_id".to_string()),
            ));
        }

        if self.max_in_flight_requests_per_connection == 0
            || self.max_in_flight_requests_per_connection > 5
        {
            return Err(KafkaError::invalid_config(
                format!(
                    "max_in_flight_requests_per_connection must be 1..=5 with idempotence, got {}",
                    self.max_in_flight_requests_per_connection
                ),
                Some("max_in_flight_requests_per_connection".to_string()),
            ));
        }

        if self.transaction_timeout.is_zero() {
            return Err(KafkaError::invalid_config(
                "transaction_timeout must be positive",
                Some("transaction_timeout".to_string()),
            ));
        }

        self.security.validate()
    }

    /// Convert to rdkafka ClientConfig properties.
    pub fn to_rdkafka_properties(&self) -> HashMap<String, String> {
        let mut props = self.additional_properties.clone();

        props.insert(
            "bootstrap.servers".to_string(),
            self.bootstrap_servers.join(","),
        );
        props.insert("client.id".to_string(), self.transactional_id.clone());
        props.insert("transactional.id".to_string(), self.transactional_id.clone());

        // Exactly-once requirements
        props.insert("acks".to_string(), "all".to_string());
        props.insert("enable.idempotence".to_string(), "true".to_string());

        props.insert("retries".to_string(), self.retries.to_string());
        props.insert("retry.backoff.ms".to_string(), millis(self.retry_backoff));
        props.insert(
            "max.in.flight.requests.per.connection".to_string(),
            self.max_in_flight_requests_per_connection.to_string(),
        );
        props.insert(
            "message.max.bytes".to_string(),
            self.message_max_bytes.to_string(),
        );
        props.insert(
            "transaction.timeout.ms".to_string(),
            millis(self.transaction_timeout),
        );
        props.insert("socket.keepalive.enable".to_string(), "true".to_string());

        self.security.apply(&mut props);
        props
    }

    pub fn to_client_config(&self) -> ClientConfig {
        client_config(&self.to_rdkafka_properties())
    }
}

impl ConsumerConfig {
    /// Create a new builder for ConsumerConfig.
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::default()
    }

    /// Build a consumer configuration for one group.
    pub fn from_settings(settings: &BridgeSettings, group_id: impl Into<String>) -> Result<Self> {
        let kafka = &settings.kafka;
        let config = Self {
            bootstrap_servers: kafka.bootstrap_servers.clone(),
            group_id: group_id.into(),
            auto_offset_reset: kafka.consumer.auto_offset_reset.clone(),
            session_timeout: Duration::from_millis(kafka.consumer.session_timeout_ms),
            heartbeat_interval: Duration::from_millis(kafka.consumer.heartbeat_interval_ms),
            max_poll_interval: Duration::from_millis(kafka.consumer.max_poll_interval_ms),
            socket_timeout: Duration::from_millis(kafka.consumer.socket_timeout_ms),
            security: SecurityConfig::from_settings(&kafka.security)?,
            additional_properties: HashMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Bootstrap servers are empty
    /// - Group ID is empty
    /// - Invalid auto_offset_reset value
    /// - SASL credentials missing when SASL is enabled
    pub fn validate(&self) -> Result<()> {
        validate_servers(&self.bootstrap_servers)?;

        if self.group_id.trim().is_empty() {
            return Err(KafkaError::invalid_config(
                "group_id cannot be empty",
                Some("group_id".to_string()),
            ));
        }

        if !["earliest", "latest", "error"].contains(&self.auto_offset_reset.as_str()) {
            return Err(KafkaError::invalid_config(
                format!(
                    "invalid auto_offset_reset: {}. Must be 'earliest', 'latest', or 'error'",
                    self.auto_offset_reset
                ),
                Some("auto_offset_reset".to_string()),
            ));
        }

        if self.heartbeat_interval >= self.session_timeout {
            return Err(KafkaError::invalid_config(
                "heartbeat_interval must be lower than session_timeout",
                Some("heartbeat_interval".to_string()),
            ));
        }

        self.security.validate()
    }

    /// Convert to rdkafka ClientConfig properties.
    pub fn to_rdkafka_properties(&self) -> HashMap<String, String> {
        let mut props = self.additional_properties.clone();

        props.insert(
            "bootstrap.servers".to_string(),
            self.bootstrap_servers.join(","),
        );
        props.insert("group.id".to_string(), self.group_id.clone());

        // Offsets only move through the producer's transaction
        props.insert("enable.auto.commit".to_string(), "false".to_string());
        props.insert("isolation.level".to_string(), "read_committed".to_string());

        props.insert(
            "auto.offset.reset".to_string(),
            self.auto_offset_reset.clone(),
        );
        props.insert(
            "session.timeout.ms".to_string(),
            millis(self.session_timeout),
        );
        props.insert(
            "heartbeat.interval.ms".to_string(),
            millis(self.heartbeat_interval),
        );
        props.insert(
            "max.poll.interval.ms".to_string(),
            millis(self.max_poll_interval),
        );
        props.insert(
            "socket.timeout.ms".to_string(),
            millis(self.socket_timeout),
        );

        self.security.apply(&mut props);
        props
    }

    pub fn to_client_config(&self) -> ClientConfig {
        client_config(&self.to_rdkafka_properties())
    }
}

impl AdminConfig {
    /// Build an admin configuration from application settings.
    pub fn from_settings(settings: &BridgeSettings) -> Result<Self> {
        let kafka = &settings.kafka;
        let config = Self {
            bootstrap_servers: kafka.bootstrap_servers.clone(),
            operation_timeout: Duration::from_millis(kafka.admin.operation_timeout_ms),
            request_timeout: Duration::from_millis(kafka.admin.request_timeout_ms),
            retention_ms: kafka.admin.retention_ms,
            retention_bytes: kafka.admin.retention_bytes,
            security: SecurityConfig::from_settings(&kafka.security)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Topic spec carrying this client's default retention.
    pub fn topic_spec(&self, name: impl Into<String>, partitions: usize) -> TopicSpec {
        TopicSpec::new(name, partitions).with_retention(self.retention_ms, self.retention_bytes)
    }

    /// Admin config with default timeouts for the given brokers.
    pub fn new(bootstrap_servers: Vec<String>) -> Self {
        Self {
            bootstrap_servers,
            operation_timeout: default_admin_timeout(),
            request_timeout: default_admin_timeout(),
            retention_ms: default_retention(),
            retention_bytes: default_retention(),
            security: SecurityConfig::default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_servers(&self.bootstrap_servers)?;
        if self.operation_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(KafkaError::invalid_config(
                "admin timeouts must be positive",
                Some("operation_timeout".to_string()),
            ));
        }
        self.security.validate()
    }

    /// Convert to rdkafka ClientConfig properties.
    pub fn to_rdkafka_properties(&self) -> HashMap<String, String> {
        let mut props = HashMap::new();
        props.insert(
            "bootstrap.servers".to_string(),
            self.bootstrap_servers.join(","),
        );
        props.insert(
            "socket.timeout.ms".to_string(),
            millis(self.request_timeout),
        );
        self.security.apply(&mut props);
        props
    }

    pub fn to_client_config(&self) -> ClientConfig {
        client_config(&self.to_rdkafka_properties())
    }
}

/// Builder for ProducerConfig.
#[derive(Default)]
pub struct ProducerConfigBuilder {
    bootstrap_servers: Option<Vec<String>>,
    transactional_id: Option<String>,
    retries: Option<u32>,
    retry_backoff: Option<Duration>,
    max_in_flight_requests_per_connection: Option<u32>,
    message_max_bytes: Option<u32>,
    transaction_timeout: Option<Duration>,
    flush_timeout: Option<Duration>,
    security: Option<SecurityConfig>,
    additional_properties: Option<HashMap<String, String>>,
}

impl ProducerConfigBuilder {
    pub fn bootstrap_servers(mut self, servers: Vec<String>) -> Self {
        self.bootstrap_servers = Some(servers);
        self
    }

    pub fn transactional_id(mut self, id: String) -> Self {
        self.transactional_id = Some(id);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn max_in_flight_requests_per_connection(mut self, requests: u32) -> Self {
        self.max_in_flight_requests_per_connection = Some(requests);
        self
    }

    pub fn message_max_bytes(mut self, bytes: u32) -> Self {
        self.message_max_bytes = Some(bytes);
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.security = Some(security);
        self
    }

    pub fn additional_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.additional_properties = Some(properties);
        self
    }

    pub fn build(self) -> Result<ProducerConfig> {
        let config = ProducerConfig {
            bootstrap_servers: self.bootstrap_servers.ok_or_else(|| {
                KafkaError::invalid_config(
                    "bootstrap_servers is required",
                    Some("bootstrap_servers".to_string()),
                )
            })?,
            transactional_id: self.transactional_id.ok_or_else(|| {
                KafkaError::invalid_config(
                    "transactional_id is required",
                    Some("transactional_id".to_string()),
                )
            })?,
            retries: self.retries.unwrap_or_else(default_retries),
            retry_backoff: self.retry_backoff.unwrap_or_else(default_retry_backoff),
            max_in_flight_requests_per_connection: self
                .max_in_flight_requests_per_connection
                .unwrap_or_else(default_max_in_flight),
            message_max_bytes: self
                .message_max_bytes
                .unwrap_or_else(default_message_max_bytes),
            transaction_timeout: self
                .transaction_timeout
                .unwrap_or_else(default_transaction_timeout),
            flush_timeout: self.flush_timeout.unwrap_or_else(default_flush_timeout),
            security: self.security.unwrap_or_default(),
            additional_properties: self.additional_properties.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Builder for ConsumerConfig.
#[derive(Default)]
pub struct ConsumerConfigBuilder {
    bootstrap_servers: Option<Vec<String>>,
    group_id: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    max_poll_interval: Option<Duration>,
    socket_timeout: Option<Duration>,
    security: Option<SecurityConfig>,
    additional_properties: Option<HashMap<String, String>>,
}

impl ConsumerConfigBuilder {
    pub fn bootstrap_servers(mut self, servers: Vec<String>) -> Self {
        self.bootstrap_servers = Some(servers);
        self
    }

    pub fn group_id(mut self, group_id: String) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn auto_offset_reset(mut self, reset: String) -> Self {
        self.auto_offset_reset = Some(reset);
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = Some(interval);
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.security = Some(security);
        self
    }

    pub fn additional_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.additional_properties = Some(properties);
        self
    }

    pub fn build(self) -> Result<ConsumerConfig> {
        let config = ConsumerConfig {
            bootstrap_servers: self.bootstrap_servers.ok_or_else(|| {
                KafkaError::invalid_config(
                    "bootstrap_servers is required",
                    Some("bootstrap_servers".to_string()),
                )
            })?,
            group_id: self.group_id.ok_or_else(|| {
                KafkaError::invalid_config("group_id is required", Some("group_id".to_string()))
            })?,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(default_auto_offset_reset),
            session_timeout: self.session_timeout.unwrap_or_else(default_session_timeout),
            heartbeat_interval: self
                .heartbeat_interval
                .unwrap_or_else(default_heartbeat_interval),
            max_poll_interval: self
                .max_poll_interval
                .unwrap_or_else(default_max_poll_interval),
            socket_timeout: self.socket_timeout.unwrap_or_else(default_socket_timeout),
            security: self.security.unwrap_or_default(),
            additional_properties: self.additional_properties.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<String> {
        vec!["localhost:9092".to_string()]
    }

    #[test]
    fn test_producer_config_fixed_properties() {
        let mut extra = HashMap::new();
        extra.insert("acks".to_string(), "1".to_string());
        extra.insert("linger.ms".to_string(), "5".to_string());

        let config = ProducerConfig::builder()
            .bootstrap_servers(servers())
            .transactional_id("job-1_events".to_string())
            .additional_properties(extra)
            .build()
            .unwrap();

        let props = config.to_rdkafka_properties();
        assert_eq!(props["acks"], "all");
        assert_eq!(props["enable.idempotence"], "true");
        assert_eq!(props["transactional.id"], "job-1_events");
        assert_eq!(props["client.id"], "job-1_events");
        assert_eq!(props["transaction.timeout.ms"], "60000");
        assert_eq!(props["linger.ms"], "5");
    }

    #[test]
    fn test_producer_config_validation() {
        assert!(ProducerConfig::builder()
            .bootstrap_servers(servers())
            .build()
            .is_err());

        assert!(ProducerConfig::builder()
            .bootstrap_servers(servers())
            .transactional_id("id".to_string())
            .max_in_flight_requests_per_connection(6)
            .build()
            .is_err());
    }

    #[test]
    fn test_consumer_config_fixed_properties() {
        let mut extra = HashMap::new();
        extra.insert("enable.auto.commit".to_string(), "true".to_string());

        let config = ConsumerConfig::builder()
            .bootstrap_servers(servers())
            .group_id("pipeline-1".to_string())
            .additional_properties(extra)
            .build()
            .unwrap();

        let props = config.to_rdkafka_properties();
        assert_eq!(props["enable.auto.commit"], "false");
        assert_eq!(props["isolation.level"], "read_committed");
        assert_eq!(props["auto.offset.reset"], "earliest");
        assert_eq!(props["group.id"], "pipeline-1");
    }

    #[test]
    fn test_consumer_config_validation() {
        let result = ConsumerConfig::builder()
            .bootstrap_servers(servers())
            .group_id("g".to_string())
            .auto_offset_reset("smallest-ish".to_string())
            .build();
        assert!(matches!(
            result,
            Err(KafkaError::InvalidConfiguration { .. })
        ));

        let result = ConsumerConfig::builder()
            .bootstrap_servers(servers())
            .group_id("g".to_string())
            .session_timeout(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(3))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_security_requires_credentials() {
        let security = SecurityConfig {
            protocol: SecurityProtocol::SaslSsl,
            sasl_mechanism: Some(SaslMechanism::ScramSha512),
            sasl_username: Some("svc".to_string()),
            sasl_password: None,
            ssl: None,
        };
        assert!(security.validate().is_err());

        let security = SecurityConfig {
            sasl_password: Some("secret".to_string()),
            ..security
        };
        assert!(security.validate().is_ok());

        let mut props = HashMap::new();
        security.apply(&mut props);
        assert_eq!(props["security.protocol"], "SASL_SSL");
        assert_eq!(props["sasl.mechanism"], "SCRAM-SHA-512");
        assert_eq!(props["sasl.username"], "svc");
    }

    #[test]
    fn test_from_settings() {
        let mut settings = BridgeSettings::default();
        settings.kafka.bootstrap_servers = vec!["k1:9092".to_string(), "k2:9092".to_string()];
        settings.kafka.security.protocol = "sasl_plaintext".to_string();
        settings.kafka.security.username = Some("u".to_string());
        settings.kafka.security.password = Some("p".to_string());

        let producer = ProducerConfig::from_settings(&settings, "p-1").unwrap();
        assert_eq!(producer.bootstrap_servers.len(), 2);
        assert_eq!(producer.security.protocol, SecurityProtocol::SaslPlaintext);
        assert_eq!(producer.security.sasl_mechanism, Some(SaslMechanism::Plain));

        let consumer = ConsumerConfig::from_settings(&settings, "g-1").unwrap();
        assert_eq!(consumer.group_id, "g-1");

        let admin = AdminConfig::from_settings(&settings).unwrap();
        assert_eq!(admin.retention_ms, settings.kafka.admin.retention_ms);

        let spec = admin.topic_spec("out", 3);
        assert_eq!(spec.desired_partition_count, 3);
        assert_eq!(spec.retention_ms, settings.kafka.admin.retention_ms);
        assert_eq!(spec.retention_bytes, settings.kafka.admin.retention_bytes);
    }

    #[test]
    fn test_security_protocol_string_conversion() {
        assert_eq!(SecurityProtocol::Plaintext.as_str(), "PLAINTEXT");
        assert_eq!(SecurityProtocol::Ssl.as_str(), "SSL");
        assert_eq!(SecurityProtocol::SaslPlaintext.as_str(), "SASL_PLAINTEXT");
        assert_eq!(SecurityProtocol::SaslSsl.as_str(), "SASL_SSL");
        assert_eq!("sasl_ssl".parse::<SecurityProtocol>().unwrap(), SecurityProtocol::SaslSsl);
        assert!("kerberos".parse::<SecurityProtocol>().is_err());
    }

    #[test]
    fn test_sasl_mechanism_string_conversion() {
        assert_eq!(SaslMechanism::Plain.as_str(), "PLAIN");
        assert_eq!(SaslMechanism::ScramSha256.as_str(), "SCRAM-SHA-256");
        assert_eq!(SaslMechanism::ScramSha512.as_str(), "SCRAM-SHA-512");
        assert_eq!("scram-sha-256".parse::<SaslMechanism>().unwrap(), SaslMechanism::ScramSha256);
    }

    #[test]
    fn test_duration_millis_serde() {
        let config = ProducerConfig::builder()
            .bootstrap_servers(servers())
            .transactional_id("id".to_string())
            .transaction_timeout(Duration::from_millis(1500))
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["transaction_timeout"], 1500);

        let parsed: ProducerConfig = serde_json::from_value(serde_json::json!({
            "bootstrap_servers": ["b:9092"],
            "transactional_id": "x"
        }))
        .unwrap();
        assert_eq!(parsed.transaction_timeout, Duration::from_secs(60));
        assert_eq!(parsed.security.protocol, SecurityProtocol::Plaintext);
    }
}
