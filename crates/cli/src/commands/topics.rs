//! Topic provisioning commands

use clap::Subcommand;
use colored::Colorize;
use eos_bridge::KafkaError;
use eos_bridge_config::BridgeSettings;

use super::admin_gateway;
use crate::error::CliResult;

#[derive(Subcommand, Debug, Clone)]
pub enum TopicsCommand {
    /// Create a topic, or grow it to at least the requested partitions
    #[command(name = "ensure")]
    Ensure {
        /// Topic name
        name: String,

        /// Minimum number of partitions
        #[arg(long, short, default_value_t = 1)]
        partitions: usize,

        /// `retention.ms` for a newly created topic (-1 for unlimited)
        #[arg(long, allow_hyphen_values = true)]
        retention_ms: Option<i64>,

        /// `retention.bytes` for a newly created topic (-1 for unlimited)
        #[arg(long, allow_hyphen_values = true)]
        retention_bytes: Option<i64>,
    },

    /// Show partition counts
    #[command(name = "describe")]
    Describe {
        /// Topic names
        #[arg(required = true)]
        names: Vec<String>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Delete topics; missing topics are ignored
    #[command(name = "delete")]
    Delete {
        /// Topic names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

impl TopicsCommand {
    pub async fn execute(&self, settings: &BridgeSettings) -> CliResult<()> {
        let (gateway, config) = admin_gateway(settings)?;

        match self {
            TopicsCommand::Ensure {
                name,
                partitions,
                retention_ms,
                retention_bytes,
            } => {
                let mut spec = config.topic_spec(name, *partitions);
                if let Some(retention_ms) = retention_ms {
                    spec.retention_ms = *retention_ms;
                }
                if let Some(retention_bytes) = retention_bytes {
                    spec.retention_bytes = *retention_bytes;
                }

                gateway.ensure_topic(&spec).await?;
                println!(
                    "{} {} has at least {} partition(s)",
                    "✓".green().bold(),
                    name.bold(),
                    partitions
                );
            }
            TopicsCommand::Describe { names, json } => {
                let described = gateway.describe_topics(names).await?;

                if *json {
                    let value: Vec<serde_json::Value> = names
                        .iter()
                        .zip(&described)
                        .map(|(name, result)| match result {
                            Ok(metadata) => serde_json::json!({
                                "name": metadata.name,
                                "partition_count": metadata.partition_count,
                            }),
                            Err(err) => serde_json::json!({
                                "name": name,
                                "error": err.to_string(),
                            }),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    return Ok(());
                }

                for (name, result) in names.iter().zip(described) {
                    match result {
                        Ok(metadata) => println!(
                            "  {} {} partition(s)",
                            metadata.name.green().bold(),
                            metadata.partition_count
                        ),
                        Err(KafkaError::TopicNotFound { .. }) => {
                            println!("  {} {}", name.yellow().bold(), "not found".dimmed())
                        }
                        Err(err) => println!("  {} {}", name.red().bold(), err),
                    }
                }
            }
            TopicsCommand::Delete { names } => {
                gateway.delete_topics(names).await?;
                println!("{} deleted {} topic(s)", "✓".green().bold(), names.len());
            }
        }

        Ok(())
    }
}
