//! Error types for SLA operations

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlaError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SlaError>;
