//! Error types for the presence gateway

use callwatch_presence_core::PresenceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Gateway has been destroyed")]
    Destroyed,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
