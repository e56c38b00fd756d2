//! Infrastructure error type

use thiserror::Error;

/// Errors raised by the shared infrastructure
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The logging subsystem could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// Internal invariant failure
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
