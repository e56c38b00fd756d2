//! Agent presence service
//!
//! Public façade over [`PresenceStore`] and [`HeartbeatMonitor`]. Every
//! operation takes the store lock once, applies its changes, releases the
//! lock and only then touches timers and emits events, so listeners may call
//! back into the service.

use crate::config::{HeartbeatConfig, PresenceConfig};
use crate::error::{PresenceError, Result};
use crate::events::PresenceEvent;
use crate::heartbeat::{HeartbeatHandler, HeartbeatMonitor};
use crate::store::{PresenceStore, RetireOutcome, Retired};
use crate::types::{
    AgentFilter, AgentMetrics, AgentPresence, HeartbeatAck, PresenceStatus, RegisterAgent,
    StatusChange, StatusChangeExtra, StatusReason, TeamSummary,
};
use callwatch_infra_common::EventBus;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct AgentPresenceService {
    config: PresenceConfig,
    store: Mutex<PresenceStore>,
    heartbeats: HeartbeatMonitor,
    events: EventBus<PresenceEvent>,
    me: Weak<AgentPresenceService>,
}

impl AgentPresenceService {
    pub fn new(config: PresenceConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            heartbeats: HeartbeatMonitor::new(config.heartbeat),
            events: EventBus::new("presence", config.event_buffer),
            store: Mutex::new(PresenceStore::new()),
            config,
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus<PresenceEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Register an agent on a connection.
    ///
    /// A live registration for the same agent is torn down first and the new
    /// record carries `connection_restored`. Fails with `CapacityExceeded`
    /// when the number of live agents has reached `max_agents`.
    pub fn register_agent(&self, request: RegisterAgent) -> Result<AgentPresence> {
        let now = Instant::now();
        let now_utc = Utc::now();

        let registration = {
            let mut store = self.store.lock();
            let already_live = store
                .status_of(&request.agent_id)
                .map(|s| s.is_live())
                .unwrap_or(false);
            if !already_live && store.live_count() >= self.config.max_agents {
                warn!(
                    agent_id = %request.agent_id,
                    limit = self.config.max_agents,
                    "rejecting agent registration, capacity reached"
                );
                return Err(PresenceError::CapacityExceeded {
                    limit: self.config.max_agents,
                });
            }
            store.register(&request, now, now_utc)
        };

        if let Some(displaced) = &registration.displaced {
            self.heartbeats.stop(&displaced.agent_id);
        }
        self.heartbeats
            .start(&request.agent_id, &request.connection_id, self.me.clone());

        info!(
            agent_id = %request.agent_id,
            connection_id = %request.connection_id,
            status = %registration.presence.status,
            "agent registered"
        );

        if let Some(displaced) = registration.displaced {
            self.emit_retired(displaced);
        }
        if let Some(old_connection) = registration.replaced_connection {
            debug!(agent_id = %request.agent_id, %old_connection, "previous connection superseded");
            self.events.emit(PresenceEvent::Disconnected {
                agent_id: request.agent_id.clone(),
                connection_id: Some(old_connection),
                reason: StatusReason::ConnectionRestored,
            });
        }
        self.events.emit(PresenceEvent::Connected {
            agent: registration.presence.clone(),
        });

        Ok(registration.presence)
    }

    /// Take an agent offline. Returns false if the agent is unknown.
    pub fn unregister_agent(&self, agent_id: &str, reason: StatusReason) -> bool {
        let outcome = self
            .store
            .lock()
            .retire(agent_id, reason, Instant::now(), Utc::now());

        match outcome {
            RetireOutcome::Unknown => false,
            RetireOutcome::AlreadyOffline => {
                self.heartbeats.stop(agent_id);
                true
            }
            RetireOutcome::Retired(retired) => {
                self.heartbeats.stop(agent_id);
                info!(agent_id, %reason, "agent unregistered");
                self.emit_retired(retired);
                true
            }
        }
    }

    /// Change an agent's status, checked against the transition table.
    ///
    /// Requesting the current status succeeds without side effects.
    pub fn change_status(
        &self,
        agent_id: &str,
        status: PresenceStatus,
        reason: StatusReason,
        extra: StatusChangeExtra,
    ) -> Result<StatusChange> {
        let now_utc = Utc::now();
        let (change, connection) = {
            let mut store = self.store.lock();
            let change =
                store.transition(agent_id, status, reason, extra, Instant::now(), now_utc)?;
            (change, store.connection_of(agent_id).map(str::to_string))
        };

        if !change.changed {
            return Ok(change);
        }

        match (change.previous_status, change.status, connection) {
            (PresenceStatus::Offline, _, Some(connection)) => {
                self.heartbeats.start(agent_id, &connection, self.me.clone());
            }
            (_, PresenceStatus::Offline, _) => {
                self.heartbeats.stop(agent_id);
            }
            _ => {}
        }

        debug!(
            agent_id,
            from = %change.previous_status,
            to = %change.status,
            %reason,
            "agent status changed"
        );
        self.events.emit(PresenceEvent::StatusChanged {
            agent_id: agent_id.to_string(),
            previous_status: change.previous_status,
            status: change.status,
            reason,
            changed_at: now_utc,
        });

        Ok(change)
    }

    /// Mark an agent busy on a call
    pub fn set_agent_busy(&self, agent_id: &str, call_sid: &str) -> Result<StatusChange> {
        if !self.config.auto_status_transitions {
            return Err(PresenceError::AutoTransitionsDisabled);
        }
        self.change_status(
            agent_id,
            PresenceStatus::Busy,
            StatusReason::CallStarted,
            StatusChangeExtra {
                active_call_sid: Some(call_sid.to_string()),
                status_message: None,
            },
        )
    }

    /// Return an agent to online after a call
    pub fn set_agent_available(&self, agent_id: &str) -> Result<StatusChange> {
        if !self.config.auto_status_transitions {
            return Err(PresenceError::AutoTransitionsDisabled);
        }
        self.change_status(
            agent_id,
            PresenceStatus::Online,
            StatusReason::CallEnded,
            StatusChangeExtra::default(),
        )
    }

    /// Accept a heartbeat from the agent's bound connection.
    ///
    /// Returns `None` for unknown agents and for connections the agent is no
    /// longer bound to; such frames are stale and silently ignored.
    pub fn process_heartbeat(
        &self,
        agent_id: &str,
        connection_id: &str,
        client_timestamp_ms: i64,
    ) -> Option<HeartbeatAck> {
        let now_utc = Utc::now();
        let status = self
            .store
            .lock()
            .record_heartbeat(agent_id, connection_id, now_utc);

        let Some(status) = status else {
            debug!(agent_id, connection_id, "ignoring heartbeat from stale connection");
            return None;
        };

        self.heartbeats.start(agent_id, connection_id, self.me.clone());

        let server_time = now_utc.timestamp_millis();
        Some(HeartbeatAck {
            status,
            server_time,
            next_heartbeat_due: server_time.saturating_add(
                i64::try_from(self.config.heartbeat.interval_ms).unwrap_or(i64::MAX),
            ),
            rtt_ms: server_time.saturating_sub(client_timestamp_ms).max(0),
        })
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentPresence> {
        self.store.lock().snapshot(agent_id, Instant::now())
    }

    /// Agents matching `filter`, ordered by agent id
    pub fn get_agents(&self, filter: &AgentFilter) -> Vec<AgentPresence> {
        self.store.lock().list(filter, Instant::now())
    }

    /// Online agents that are not on a call
    pub fn get_available_agents(&self) -> Vec<AgentPresence> {
        let filter = AgentFilter {
            statuses: Some(vec![PresenceStatus::Online]),
            ..Default::default()
        };
        self.get_agents(&filter)
            .into_iter()
            .filter(|a| a.active_call_sid.is_none())
            .collect()
    }

    pub fn get_agent_metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.store.lock().metrics(agent_id, Instant::now())
    }

    pub fn get_team_summary(&self, include_offline: bool) -> TeamSummary {
        self.store
            .lock()
            .team_summary(include_offline, Instant::now(), Utc::now())
    }

    pub fn get_heartbeat_config(&self) -> HeartbeatConfig {
        self.heartbeats.config()
    }

    /// Agent bound to a live connection
    pub fn agent_for_connection(&self, connection_id: &str) -> Option<String> {
        self.store
            .lock()
            .agent_for_connection(connection_id)
            .map(str::to_string)
    }

    pub fn is_tracking_heartbeat(&self, agent_id: &str) -> bool {
        self.heartbeats.is_tracking(agent_id)
    }

    /// Cancel every heartbeat timer. Idempotent.
    pub fn shutdown(&self) {
        let cancelled = self.heartbeats.shutdown();
        if cancelled > 0 {
            info!(cancelled, "presence service shut down");
        }
    }

    fn emit_retired(&self, retired: Retired) {
        self.events.emit(PresenceEvent::Disconnected {
            agent_id: retired.agent_id.clone(),
            connection_id: retired.connection_id,
            reason: retired.reason,
        });
        self.events.emit(PresenceEvent::StatusChanged {
            agent_id: retired.agent_id,
            previous_status: retired.previous_status,
            status: PresenceStatus::Offline,
            reason: retired.reason,
            changed_at: Utc::now(),
        });
    }
}

impl HeartbeatHandler for AgentPresenceService {
    fn on_heartbeat_missed(&self, agent_id: &str, connection_id: &str, missed: u32) -> bool {
        let still_bound = self
            .store
            .lock()
            .note_missed_heartbeat(agent_id, connection_id, missed);
        if still_bound {
            debug!(agent_id, missed, "heartbeat missed");
        }
        still_bound
    }

    fn on_heartbeat_timeout(&self, agent_id: &str, connection_id: &str, missed: u32) {
        let threshold = self.config.heartbeat.missed_threshold;
        let retired = {
            let mut store = self.store.lock();
            // A heartbeat that raced with this timer resets the counter
            let expired = store.connection_of(agent_id) == Some(connection_id)
                && store.missed_heartbeats(agent_id).unwrap_or(0) >= threshold;
            if !expired {
                return;
            }
            store.retire(
                agent_id,
                StatusReason::HeartbeatTimeout,
                Instant::now(),
                Utc::now(),
            )
        };

        let RetireOutcome::Retired(retired) = retired else {
            return;
        };

        warn!(agent_id, connection_id, missed, "agent heartbeat timed out");
        self.events.emit(PresenceEvent::Timeout {
            agent_id: agent_id.to_string(),
            connection_id: connection_id.to_string(),
            missed_heartbeats: missed,
            last_heartbeat_at: retired.last_heartbeat_at,
        });
        self.events.emit(PresenceEvent::StatusChanged {
            agent_id: retired.agent_id,
            previous_status: retired.previous_status,
            status: PresenceStatus::Offline,
            reason: StatusReason::HeartbeatTimeout,
            changed_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(max_agents: usize) -> Arc<AgentPresenceService> {
        AgentPresenceService::new(PresenceConfig {
            max_agents,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn capacity_counts_only_live_agents() {
        let presence = service(1);
        presence.register_agent(RegisterAgent::new("a1", "c1")).unwrap();

        let err = presence.register_agent(RegisterAgent::new("a2", "c2")).unwrap_err();
        assert_eq!(err, PresenceError::CapacityExceeded { limit: 1 });

        // Reconnecting the live agent is not a new slot
        presence.register_agent(RegisterAgent::new("a1", "c3")).unwrap();

        assert!(presence.unregister_agent("a1", StatusReason::Logout));
        presence.register_agent(RegisterAgent::new("a2", "c2")).unwrap();
    }

    #[tokio::test]
    async fn unregister_unknown_agent_returns_false() {
        let presence = service(10);
        assert!(!presence.unregister_agent("ghost", StatusReason::Logout));
    }

    #[tokio::test]
    async fn auto_transitions_can_be_disabled() {
        let presence = AgentPresenceService::new(PresenceConfig {
            auto_status_transitions: false,
            ..Default::default()
        });
        presence.register_agent(RegisterAgent::new("a1", "c1")).unwrap();
        assert_eq!(
            presence.set_agent_busy("a1", "CA1").unwrap_err(),
            PresenceError::AutoTransitionsDisabled
        );
        assert_eq!(
            presence.set_agent_available("a1").unwrap_err(),
            PresenceError::AutoTransitionsDisabled
        );
    }

    #[tokio::test]
    async fn heartbeat_ack_reports_rtt_and_next_due() {
        let presence = service(10);
        presence.register_agent(RegisterAgent::new("a1", "c1")).unwrap();

        let sent = Utc::now().timestamp_millis() - 40;
        let ack = presence.process_heartbeat("a1", "c1", sent).unwrap();
        assert_eq!(ack.status, PresenceStatus::Online);
        assert!(ack.rtt_ms >= 40);
        assert_eq!(
            ack.next_heartbeat_due - ack.server_time,
            presence.get_heartbeat_config().interval_ms as i64
        );

        assert!(presence.process_heartbeat("a1", "stale", sent).is_none());
        assert!(presence.process_heartbeat("ghost", "c1", sent).is_none());
    }
}
