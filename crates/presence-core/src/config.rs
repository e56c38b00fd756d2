//! Presence service configuration

use crate::error::{PresenceError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Liveness timer parameters shared by every agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Expected time between two heartbeats
    pub interval_ms: u64,
    /// Consecutive missed intervals before the grace period starts
    pub missed_threshold: u32,
    /// Extra time allowed after the last missed interval
    pub grace_period_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            missed_threshold: 3,
            grace_period_ms: 5_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Silence after which an agent is forced offline. Saturates at
    /// `Duration::MAX`; [`HeartbeatConfig::validate`] rejects such values.
    pub fn timeout(&self) -> Duration {
        self.checked_timeout().unwrap_or(Duration::MAX)
    }

    fn checked_timeout(&self) -> Option<Duration> {
        self.interval()
            .checked_mul(self.missed_threshold)?
            .checked_add(self.grace_period())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(PresenceError::Config("heartbeat interval must be > 0".into()));
        }
        if self.missed_threshold == 0 {
            return Err(PresenceError::Config("missed heartbeat threshold must be > 0".into()));
        }
        if self.checked_timeout().is_none() {
            return Err(PresenceError::Config(
                "heartbeat interval x missed threshold + grace period overflows".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the agent presence service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Maximum number of agents that may be live (not offline) at once
    pub max_agents: usize,
    /// Whether `set_agent_busy`/`set_agent_available` are honored
    pub auto_status_transitions: bool,
    pub heartbeat: HeartbeatConfig,
    /// Buffer size of the async event channel
    pub event_buffer: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            max_agents: 500,
            auto_status_transitions: true,
            heartbeat: HeartbeatConfig::default(),
            event_buffer: 1024,
        }
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(PresenceError::Config("max_agents must be > 0".into()));
        }
        self.heartbeat.validate()
    }
}
