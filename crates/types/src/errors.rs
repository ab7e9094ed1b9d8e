//! Error types for the data model

use thiserror::Error;

/// Result type alias for data model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Validation errors raised while building data model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid broker count: {0} (at least one broker is required)")]
    InvalidBrokerCount(usize),

    #[error("Invalid topic spec for '{topic}': {message}")]
    InvalidTopicSpec { topic: String, message: String },

    #[error("Invalid output record: {0}")]
    InvalidRecord(String),
}
