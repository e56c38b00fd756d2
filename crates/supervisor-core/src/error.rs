//! Error types for supervision operations

use crate::types::{MonitoringMode, SupervisorRole};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SupervisorError {
    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Supervisor session not found: {0}")]
    SessionNotFound(String),

    #[error("No pending handoff for call {0}")]
    HandoffNotFound(String),

    #[error("{resource} capacity exceeded (limit {limit})")]
    CapacityExceeded { resource: &'static str, limit: usize },

    #[error("Role {role} may not use monitoring mode {mode}")]
    InsufficientPermissions {
        role: SupervisorRole,
        mode: MonitoringMode,
    },

    #[error("Session {0} is not monitoring a call")]
    NotMonitoring(String),

    #[error("Monitoring mode {0} cannot be requested")]
    InvalidMode(MonitoringMode),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
