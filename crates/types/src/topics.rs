//! Topic provisioning types

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, Result};

/// Kafka's "no limit" value for `retention.ms` and `retention.bytes`
pub const UNLIMITED_RETENTION: i64 = -1;

/// Desired shape of an output topic.
///
/// Identity is `name`. Partition counts only ever grow: a spec asking for
/// fewer partitions than the topic already has is satisfied as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Topic name
    pub name: String,
    /// Minimum number of partitions
    pub desired_partition_count: usize,
    /// `retention.ms` applied on creation
    #[serde(default = "default_retention")]
    pub retention_ms: i64,
    /// `retention.bytes` applied on creation
    #[serde(default = "default_retention")]
    pub retention_bytes: i64,
}

fn default_retention() -> i64 {
    UNLIMITED_RETENTION
}

impl TopicSpec {
    /// Create a spec with unlimited retention
    pub fn new(name: impl Into<String>, desired_partition_count: usize) -> Self {
        Self {
            name: name.into(),
            desired_partition_count,
            retention_ms: UNLIMITED_RETENTION,
            retention_bytes: UNLIMITED_RETENTION,
        }
    }

    /// Set retention settings
    pub fn with_retention(mut self, retention_ms: i64, retention_bytes: i64) -> Self {
        self.retention_ms = retention_ms;
        self.retention_bytes = retention_bytes;
        self
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidTopicSpec {
                topic: self.name.clone(),
                message: "name cannot be empty".to_string(),
            });
        }
        if self.desired_partition_count == 0 {
            return Err(ModelError::InvalidTopicSpec {
                topic: self.name.clone(),
                message: "desired_partition_count must be at least 1".to_string(),
            });
        }
        if self.desired_partition_count > i32::MAX as usize {
            return Err(ModelError::InvalidTopicSpec {
                topic: self.name.clone(),
                message: format!(
                    "desired_partition_count {} exceeds the broker limit",
                    self.desired_partition_count
                ),
            });
        }
        for (field, value) in [
            ("retention_ms", self.retention_ms),
            ("retention_bytes", self.retention_bytes),
        ] {
            if value < UNLIMITED_RETENTION {
                return Err(ModelError::InvalidTopicSpec {
                    topic: self.name.clone(),
                    message: format!("{} must be -1 or non-negative, got {}", field, value),
                });
            }
        }
        Ok(())
    }
}

/// Partition layout of an existing topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    /// Topic name
    pub name: String,
    /// Number of partitions
    pub partition_count: usize,
}

/// Replication factor selection from the number of live brokers.
///
/// This is a fixed policy: `1..=2` brokers replicate once, `3..=4` twice and
/// five or more brokers three times. It does not consult broker-level
/// defaults or per-topic overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationPolicy;

impl ReplicationPolicy {
    /// Replication factor for a cluster of `brokers_count` brokers
    pub fn replication_factor(brokers_count: usize) -> Result<i32> {
        match brokers_count {
            0 => Err(ModelError::InvalidBrokerCount(0)),
            1 | 2 => Ok(1),
            3 | 4 => Ok(2),
            _ => Ok(3),
        }
    }
}
