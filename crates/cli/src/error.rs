//! CLI error type

use eos_bridge::{BridgeError, KafkaError};
use eos_bridge_config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Kafka(#[from] KafkaError),

    #[error("{0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("worker task failed: {0}")]
    Task(String),
}

pub type CliResult<T> = std::result::Result<T, CliError>;
