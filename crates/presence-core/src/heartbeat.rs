//! Per-agent heartbeat liveness timers
//!
//! Each agent gets its own timer task. The task wakes once per heartbeat
//! interval and reports a miss; after `missed_threshold` consecutive misses
//! it waits out the grace period and reports a timeout. A heartbeat restarts
//! the agent's task from zero, so timeout precision does not depend on how
//! many agents are tracked.

use crate::config::HeartbeatConfig;
use callwatch_infra_common::TimerSet;
use std::sync::Weak;
use tracing::debug;

/// Receiver of heartbeat timer callbacks
pub trait HeartbeatHandler: Send + Sync + 'static {
    /// One more interval passed without a heartbeat. Returning false stops
    /// the timer, e.g. because the binding it was started for is gone.
    fn on_heartbeat_missed(&self, agent_id: &str, connection_id: &str, missed: u32) -> bool;

    /// The threshold and grace period elapsed without a heartbeat
    fn on_heartbeat_timeout(&self, agent_id: &str, connection_id: &str, missed: u32);
}

/// Liveness timers keyed by agent id
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    timers: TimerSet<String>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            timers: TimerSet::new("heartbeat"),
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }

    /// Start, or restart from zero, the timer for `agent_id`
    pub fn start<H: HeartbeatHandler>(
        &self,
        agent_id: &str,
        connection_id: &str,
        handler: Weak<H>,
    ) {
        let interval = self.config.interval();
        let grace = self.config.grace_period();
        let threshold = self.config.missed_threshold;
        let agent = agent_id.to_string();
        let connection = connection_id.to_string();
        debug!(
            agent_id,
            timeout_ms = u64::try_from(self.config.timeout().as_millis()).unwrap_or(u64::MAX),
            "heartbeat timer armed"
        );

        self.timers.spawn(agent_id.to_string(), move |_token| async move {
            let mut missed = 0;
            while missed < threshold {
                tokio::time::sleep(interval).await;
                missed += 1;
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                if !handler.on_heartbeat_missed(&agent, &connection, missed) {
                    debug!(agent_id = %agent, "heartbeat timer stopped, binding is gone");
                    return;
                }
            }

            tokio::time::sleep(grace).await;
            if let Some(handler) = handler.upgrade() {
                handler.on_heartbeat_timeout(&agent, &connection, missed);
            }
        });
    }

    /// Stop the timer for `agent_id`
    pub fn stop(&self, agent_id: &str) -> bool {
        self.timers.cancel(&agent_id.to_string())
    }

    pub fn is_tracking(&self, agent_id: &str) -> bool {
        self.timers.is_scheduled(&agent_id.to_string())
    }

    pub fn tracked(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every timer and refuse new ones
    pub fn shutdown(&self) -> usize {
        self.timers.shutdown()
    }
}
