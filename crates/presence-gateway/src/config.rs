//! Gateway configuration

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Channel every connected agent is subscribed to
pub const ROSTER_CHANNEL: &str = "roster";
/// Channel supervisor alerts are broadcast on
pub const ALERTS_CHANNEL: &str = "alerts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Delay between the first presence change of a burst and the roster it
    /// produces
    pub roster_debounce_ms: u64,
    /// Subscribers per channel; further subscriptions are dropped
    pub max_subscribers_per_channel: usize,
    /// Buffer size of the async event channel
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            roster_debounce_ms: 500,
            max_subscribers_per_channel: 1000,
            event_buffer: 256,
        }
    }
}

impl GatewayConfig {
    pub fn roster_debounce(&self) -> Duration {
        Duration::from_millis(self.roster_debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_subscribers_per_channel == 0 {
            return Err(GatewayError::Config(
                "max_subscribers_per_channel must be > 0".into(),
            ));
        }
        Ok(())
    }
}
