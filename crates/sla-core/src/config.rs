//! SLA thresholds

use crate::error::{Result, SlaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds for one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Longest wait, in seconds, before a warning
    pub max_wait_time: u64,
    /// Longest wait, in seconds, before a critical breach
    pub critical_wait_time: u64,
    pub max_queue_size: u32,
    pub critical_queue_size: u32,
    /// Percent of calls that must be answered within `target_answer_time`
    pub service_level_target: f64,
    pub target_answer_time: u64,
    /// Abandon rate percent above which a breach is raised
    pub max_abandon_rate: f64,
    /// Calls needed today before the abandon rate is judged
    pub min_calls_for_abandon_rate: u32,
    pub alert_enabled: bool,
    /// A breach that recurs within this many seconds of an unresolved one
    /// of the same type is a continuation
    pub continuation_window_secs: u64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            max_wait_time: 120,
            critical_wait_time: 300,
            max_queue_size: 10,
            critical_queue_size: 25,
            service_level_target: 80.0,
            target_answer_time: 20,
            max_abandon_rate: 5.0,
            min_calls_for_abandon_rate: 10,
            alert_enabled: true,
            continuation_window_secs: 900,
        }
    }
}

impl SlaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.critical_wait_time < self.max_wait_time {
            return Err(SlaError::Config(
                "critical_wait_time must be >= max_wait_time".into(),
            ));
        }
        if self.critical_queue_size < self.max_queue_size {
            return Err(SlaError::Config(
                "critical_queue_size must be >= max_queue_size".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.service_level_target) {
            return Err(SlaError::Config(
                "service_level_target must be a percentage".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_abandon_rate) {
            return Err(SlaError::Config("max_abandon_rate must be a percentage".into()));
        }
        Ok(())
    }
}

/// Engine-wide settings: default thresholds, per-queue overrides and
/// history bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaEngineConfig {
    pub defaults: SlaConfig,
    pub queues: BTreeMap<String, SlaConfig>,
    /// Breach records kept per queue
    pub history_limit: usize,
    /// Reports kept per queue
    pub report_limit: usize,
    /// Buffer size of the async event channel
    pub event_buffer: usize,
}

impl Default for SlaEngineConfig {
    fn default() -> Self {
        Self {
            defaults: SlaConfig::default(),
            queues: BTreeMap::new(),
            history_limit: 1000,
            report_limit: 100,
            event_buffer: 1024,
        }
    }
}

impl SlaEngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate()?;
        for (queue, config) in &self.queues {
            config
                .validate()
                .map_err(|e| SlaError::Config(format!("queue {queue}: {e}")))?;
        }
        if self.history_limit == 0 {
            return Err(SlaError::Config("history_limit must be > 0".into()));
        }
        Ok(())
    }
}
