//! Error types for presence operations

use crate::types::PresenceStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PresenceError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid status transition for agent {agent_id}: {from} -> {to}")]
    InvalidTransition {
        agent_id: String,
        from: PresenceStatus,
        to: PresenceStatus,
    },

    #[error("Active agent capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    #[error("Automatic status transitions are disabled")]
    AutoTransitionsDisabled,

    #[error("Agent {0} has no connection to restore")]
    NotConnected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PresenceError>;
