//! Presence lifecycle events

use crate::types::{AgentPresence, PresenceStatus, StatusReason};
use callwatch_infra_common::NamedEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Events emitted by [`crate::AgentPresenceService`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// `agent:connected`
    Connected { agent: AgentPresence },

    /// `agent:disconnected`
    Disconnected {
        agent_id: String,
        connection_id: Option<String>,
        reason: StatusReason,
    },

    /// `agent:status_changed`
    StatusChanged {
        agent_id: String,
        previous_status: PresenceStatus,
        status: PresenceStatus,
        reason: StatusReason,
        changed_at: DateTime<Utc>,
    },

    /// `agent:timeout`
    Timeout {
        agent_id: String,
        connection_id: String,
        missed_heartbeats: u32,
        last_heartbeat_at: Option<DateTime<Utc>>,
    },
}

impl PresenceEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            PresenceEvent::Connected { agent } => &agent.agent_id,
            PresenceEvent::Disconnected { agent_id, .. }
            | PresenceEvent::StatusChanged { agent_id, .. }
            | PresenceEvent::Timeout { agent_id, .. } => agent_id,
        }
    }

    /// Whether this event changes what a roster snapshot would show
    pub fn affects_roster(&self) -> bool {
        matches!(
            self,
            PresenceEvent::Connected { .. }
                | PresenceEvent::Disconnected { .. }
                | PresenceEvent::StatusChanged { .. }
        )
    }
}

impl NamedEvent for PresenceEvent {
    fn event_name(&self) -> &'static str {
        match self {
            PresenceEvent::Connected { .. } => "agent:connected",
            PresenceEvent::Disconnected { .. } => "agent:disconnected",
            PresenceEvent::StatusChanged { .. } => "agent:status_changed",
            PresenceEvent::Timeout { .. } => "agent:timeout",
        }
    }
}
