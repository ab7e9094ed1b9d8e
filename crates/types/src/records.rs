//! Record types flowing through the bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::{ModelError, Result};

/// A `(topic, partition)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A record to be produced inside a transaction.
///
/// Records are immutable once built; the batch that owns them hands them to
/// the producer session by reference and keeps ownership until every
/// delivery report has been drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Target topic
    pub topic: String,
    /// Explicit partition, if the caller pins one
    pub partition: Option<i32>,
    /// Partition routing key
    pub partition_key: Option<Vec<u8>>,
    /// Record payload; `None` is a tombstone
    pub value: Option<Vec<u8>>,
    /// Record headers
    pub headers: HashMap<String, Vec<u8>>,
}

impl OutputRecord {
    /// Create a new record for a topic
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            partition_key: None,
            value: Some(value.into()),
            headers: HashMap::new(),
        }
    }

    /// Create a tombstone (null payload) for a key
    pub fn tombstone(topic: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            partition_key: Some(key.into()),
            value: None,
            headers: HashMap::new(),
        }
    }

    /// Set the partition routing key
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Pin the record to a partition
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Approximate wire size used for batch byte accounting
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.value.as_ref().map_or(0, Vec::len) + self.partition_key.as_ref().map_or(0, Vec::len) + headers
    }

    /// Check the record can be sent
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(ModelError::InvalidRecord("topic cannot be empty".to_string()));
        }
        if let Some(partition) = self.partition {
            if partition < 0 {
                return Err(ModelError::InvalidRecord(format!(
                    "partition must be non-negative, got {}",
                    partition
                )));
            }
        }
        Ok(())
    }
}

/// A message read from the input topics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset of this message
    pub offset: i64,
    /// Message key
    pub key: Option<Vec<u8>>,
    /// Message payload
    pub payload: Option<Vec<u8>>,
    /// Message headers
    pub headers: HashMap<String, Vec<u8>>,
    /// Broker or producer timestamp, when present
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedMessage {
    /// The partition this message was read from
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Payload size plus key size
    pub fn size_bytes(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len) + self.key.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_record_builder() {
        let record = OutputRecord::new("metrics", b"{\"v\":1}".to_vec())
            .with_key("model-7")
            .with_header("trace-id", "abc");

        assert_eq!(record.topic, "metrics");
        assert_eq!(record.partition_key.as_deref(), Some(&b"model-7"[..]));
        assert_eq!(record.headers.get("trace-id").map(Vec::as_slice), Some(&b"abc"[..]));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_output_record_validation() {
        assert!(OutputRecord::new("", "x").validate().is_err());
        assert!(OutputRecord::new("t", "x").with_partition(-1).validate().is_err());
    }

    #[test]
    fn test_size_accounting() {
        let record = OutputRecord::new("t", vec![0u8; 10])
            .with_key(vec![0u8; 4])
            .with_header("h", vec![0u8; 5]);
        assert_eq!(record.size_bytes(), 20);
    }

    #[test]
    fn test_tombstone_has_no_payload() {
        let record = OutputRecord::tombstone("t", "k");
        assert!(record.value.is_none());
        assert_eq!(record.size_bytes(), 1);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_topic_partition_ordering_and_display() {
        let a = TopicPartition::new("a", 1);
        let b = TopicPartition::new("a", 2);
        let c = TopicPartition::new("b", 0);
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "a[1]");
    }
}
