//! Topic and consumer-group administration.
//!
//! Every call is a single attempt bounded by the configured admin timeouts;
//! nothing here retries. Callers that want retries wrap the gateway.

use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, NewPartitions, NewTopic, TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use eos_bridge_types::{ReplicationPolicy, TopicMetadata, TopicSpec};

use super::config::AdminConfig;
use super::error::{KafkaError, Result};

/// Snapshot of the cluster used for topic provisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    /// Number of brokers currently reported by the cluster
    pub broker_count: usize,
    /// Partition count per existing topic
    pub topics: HashMap<String, usize>,
}

/// Outcome of deleting one topic or group.
pub type DeletionResult = (String, Result<()>);

/// Cluster-side admin operations.
///
/// Implemented by [`RdKafkaAdmin`] against a real cluster and by
/// [`crate::testing::InMemoryBroker`] in tests.
#[async_trait]
pub trait AdminBackend: Send + Sync {
    /// Broker count and topic layout.
    async fn cluster_metadata(&self) -> Result<ClusterMetadata>;

    /// Create a topic with `spec.desired_partition_count` partitions.
    async fn create_topic(&self, spec: &TopicSpec, replication_factor: i32) -> Result<()>;

    /// Grow a topic to `total` partitions.
    async fn create_partitions(&self, topic: &str, total: usize) -> Result<()>;

    /// Delete topics, reporting each one separately.
    async fn delete_topics(&self, topics: &[String]) -> Result<Vec<DeletionResult>>;

    /// Delete consumer groups, reporting each one separately.
    async fn delete_groups(&self, groups: &[String]) -> Result<Vec<DeletionResult>>;
}

/// Admin backend over an rdkafka [`AdminClient`].
pub struct RdKafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    config: AdminConfig,
}

impl RdKafkaAdmin {
    pub fn new(config: AdminConfig) -> Result<Self> {
        config.validate()?;
        let client: AdminClient<DefaultClientContext> = config.to_client_config().create()?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(self.config.operation_timeout))
            .request_timeout(Some(self.config.request_timeout))
    }

    fn timeout_ms(&self) -> u64 {
        self.config.request_timeout.as_millis() as u64
    }
}

#[async_trait]
impl AdminBackend for RdKafkaAdmin {
    async fn cluster_metadata(&self) -> Result<ClusterMetadata> {
        let client = Arc::clone(&self.client);
        let timeout = self.config.request_timeout;

        let metadata = tokio::task::spawn_blocking(move || {
            client.inner().fetch_metadata(None, timeout).map(|metadata| {
                let topics = metadata
                    .topics()
                    .iter()
                    .filter(|topic| topic.error().is_none())
                    .map(|topic| (topic.name().to_string(), topic.partitions().len()))
                    .collect();
                ClusterMetadata {
                    broker_count: metadata.brokers().len(),
                    topics,
                }
            })
        })
        .await
        .map_err(|e| KafkaError::Other(format!("metadata task failed: {}", e)))?;

        metadata.map_err(|err| match err {
            rdkafka::error::KafkaError::MetadataFetch(RDKafkaErrorCode::OperationTimedOut) => {
                KafkaError::timeout("fetch metadata", self.timeout_ms())
            }
            other => other.into(),
        })
    }

    async fn create_topic(&self, spec: &TopicSpec, replication_factor: i32) -> Result<()> {
        let retention_ms = spec.retention_ms.to_string();
        let retention_bytes = spec.retention_bytes.to_string();
        let topic = NewTopic::new(
            &spec.name,
            spec.desired_partition_count as i32,
            TopicReplication::Fixed(replication_factor),
        )
        .set("retention.ms", &retention_ms)
        .set("retention.bytes", &retention_bytes);

        let results = self.client.create_topics(&[topic], &self.options()).await?;
        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, "Topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(KafkaError::TopicAlreadyExists { topic: name });
                }
                Err((name, code)) => {
                    return Err(admin_error("create_topic", name, code, self.timeout_ms()));
                }
            }
        }
        Ok(())
    }

    async fn create_partitions(&self, topic: &str, total: usize) -> Result<()> {
        let partitions = NewPartitions::new(topic, total);
        let results = self
            .client
            .create_partitions(&[partitions], &self.options())
            .await?;
        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, total, "Partitions created"),
                Err((name, RDKafkaErrorCode::InvalidPartitions)) => {
                    return Err(KafkaError::PartitionsAlreadySufficient {
                        topic: name,
                        requested: total,
                    });
                }
                Err((name, code)) => {
                    return Err(admin_error("create_partitions", name, code, self.timeout_ms()));
                }
            }
        }
        Ok(())
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<Vec<DeletionResult>> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        let results = self.client.delete_topics(&names, &self.options()).await?;
        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, Ok(())),
                Err((name, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    let err = KafkaError::TopicNotFound {
                        topic: name.clone(),
                    };
                    (name, Err(err))
                }
                Err((name, code)) => {
                    let err = admin_error("delete_topics", name.clone(), code, self.timeout_ms());
                    (name, Err(err))
                }
            })
            .collect())
    }

    async fn delete_groups(&self, groups: &[String]) -> Result<Vec<DeletionResult>> {
        let names: Vec<&str> = groups.iter().map(String::as_str).collect();
        let results = self.client.delete_groups(&names, &self.options()).await?;
        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, Ok(())),
                Err((name, RDKafkaErrorCode::GroupIdNotFound)) => {
                    let err = KafkaError::GroupNotFound {
                        group_id: name.clone(),
                    };
                    (name, Err(err))
                }
                Err((name, code)) => {
                    let err = admin_error("delete_groups", name.clone(), code, self.timeout_ms());
                    (name, Err(err))
                }
            })
            .collect())
    }
}

fn admin_error(operation: &str, target: String, code: RDKafkaErrorCode, timeout_ms: u64) -> KafkaError {
    match code {
        RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut => {
            KafkaError::timeout(format!("{} {}", operation, target), timeout_ms)
        }
        code => KafkaError::admin(operation, target, code.to_string(), Some(code)),
    }
}

/// Topic and consumer-group management on top of an [`AdminBackend`].
pub struct AdminGateway<B> {
    backend: B,
}

impl<B: AdminBackend> AdminGateway<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Partition counts for the named topics, one result per input name.
    ///
    /// A missing topic yields [`KafkaError::TopicNotFound`] in its slot;
    /// the other topics are still reported.
    pub async fn describe_topics(&self, topics: &[String]) -> Result<Vec<Result<TopicMetadata>>> {
        let metadata = self.backend.cluster_metadata().await?;
        Ok(topics
            .iter()
            .map(|name| match metadata.topics.get(name) {
                Some(&partition_count) => Ok(TopicMetadata {
                    name: name.clone(),
                    partition_count,
                }),
                None => Err(KafkaError::TopicNotFound {
                    topic: name.clone(),
                }),
            })
            .collect())
    }

    /// Make sure a topic exists with at least the requested partitions.
    ///
    /// Creates a missing topic with the replication factor chosen by
    /// [`ReplicationPolicy`], grows an existing topic that has too few
    /// partitions and leaves everything else untouched. Running it twice
    /// with the same spec is a no-op the second time.
    pub async fn ensure_topic(&self, spec: &TopicSpec) -> Result<()> {
        spec.validate()?;

        let metadata = self.backend.cluster_metadata().await?;
        let replication_factor = ReplicationPolicy::replication_factor(metadata.broker_count)?;

        match metadata.topics.get(&spec.name) {
            None => {
                info!(
                    topic = %spec.name,
                    partitions = spec.desired_partition_count,
                    replication_factor,
                    "Creating topic"
                );
                match self.backend.create_topic(spec, replication_factor).await {
                    Ok(()) => Ok(()),
                    Err(KafkaError::TopicAlreadyExists { topic }) => {
                        // Created concurrently; its layout is checked on the next call.
                        warn!(topic = %topic, "Topic appeared while creating it");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Some(&current) if current < spec.desired_partition_count => {
                info!(
                    topic = %spec.name,
                    current,
                    requested = spec.desired_partition_count,
                    "Growing topic partitions"
                );
                match self
                    .backend
                    .create_partitions(&spec.name, spec.desired_partition_count)
                    .await
                {
                    Ok(()) | Err(KafkaError::PartitionsAlreadySufficient { .. }) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            Some(&current) => {
                debug!(topic = %spec.name, current, "Topic already satisfies spec");
                Ok(())
            }
        }
    }

    /// Delete topics. Topics that do not exist count as deleted.
    pub async fn delete_topics(&self, topics: &[String]) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }
        let results = self.backend.delete_topics(topics).await?;
        for (name, result) in results {
            match result {
                Ok(()) => info!(topic = %name, "Topic deleted"),
                Err(KafkaError::TopicNotFound { .. }) => {
                    debug!(topic = %name, "Topic already absent")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Delete consumer groups. Groups that do not exist count as deleted.
    pub async fn delete_consumer_groups(&self, groups: &[String]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let results = self.backend.delete_groups(groups).await?;
        for (name, result) in results {
            match result {
                Ok(()) => info!(group_id = %name, "Consumer group deleted"),
                Err(KafkaError::GroupNotFound { .. }) => {
                    debug!(group_id = %name, "Consumer group already absent")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
