//! Supervisor agent configuration

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Calls tracked at once; registering past it fails
    pub max_active_calls: usize,
    /// Concurrent supervisor sessions; creating past it fails
    pub max_supervisor_sessions: usize,
    /// Case-insensitive phrases that flag a call for escalation
    pub escalation_keywords: Vec<String>,
    /// Sentiment scores below this raise a negative-sentiment alert
    pub negative_sentiment_threshold: f64,
    /// Sessions without activity for this long are ended by the cleanup timer
    pub session_idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Buffer size of the async event channel
    pub event_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_active_calls: 1000,
            max_supervisor_sessions: 50,
            escalation_keywords: [
                "speak to a human",
                "talk to a person",
                "real person",
                "supervisor",
                "manager",
                "complaint",
                "lawyer",
                "cancel",
                "emergency",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            negative_sentiment_threshold: -0.5,
            session_idle_timeout_secs: 8 * 60 * 60,
            cleanup_interval_secs: 300,
            event_buffer: 1024,
        }
    }
}

impl SupervisorConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_active_calls == 0 {
            return Err(SupervisorError::Config("max_active_calls must be > 0".into()));
        }
        if self.max_supervisor_sessions == 0 {
            return Err(SupervisorError::Config(
                "max_supervisor_sessions must be > 0".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(SupervisorError::Config("cleanup_interval_secs must be > 0".into()));
        }
        if !(-1.0..=1.0).contains(&self.negative_sentiment_threshold) {
            return Err(SupervisorError::Config(
                "negative_sentiment_threshold must be within [-1, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Lowercased keywords, empty entries removed
    pub(crate) fn normalized_keywords(&self) -> Vec<String> {
        self.escalation_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}
