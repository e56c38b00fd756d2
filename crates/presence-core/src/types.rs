//! Core types for agent presence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Agent availability state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Logged in and ready for calls
    Online,
    /// Handling a call
    Busy,
    /// Temporarily away from the desk
    Away,
    /// Logged in but not accepting calls
    Dnd,
    /// Not connected
    Offline,
}

impl PresenceStatus {
    pub const ALL: [PresenceStatus; 5] = [
        PresenceStatus::Online,
        PresenceStatus::Busy,
        PresenceStatus::Away,
        PresenceStatus::Dnd,
        PresenceStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Away => "away",
            PresenceStatus::Dnd => "dnd",
            PresenceStatus::Offline => "offline",
        }
    }

    /// Every status except offline holds a connection
    pub fn is_live(&self) -> bool {
        !matches!(self, PresenceStatus::Offline)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(PresenceStatus::Online),
            "busy" => Ok(PresenceStatus::Busy),
            "away" => Ok(PresenceStatus::Away),
            "dnd" => Ok(PresenceStatus::Dnd),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("Unknown presence status: {}", other)),
        }
    }
}

/// Why an agent's status last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    Login,
    Manual,
    CallStarted,
    CallEnded,
    Logout,
    ConnectionLost,
    ConnectionRestored,
    HeartbeatTimeout,
    #[serde(other)]
    Other,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::Login => "login",
            StatusReason::Manual => "manual",
            StatusReason::CallStarted => "call_started",
            StatusReason::CallEnded => "call_ended",
            StatusReason::Logout => "logout",
            StatusReason::ConnectionLost => "connection_lost",
            StatusReason::ConnectionRestored => "connection_restored",
            StatusReason::HeartbeatTimeout => "heartbeat_timeout",
            StatusReason::Other => "other",
        }
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative seconds spent in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTimes {
    pub online: f64,
    pub busy: f64,
    pub away: f64,
    pub dnd: f64,
    pub offline: f64,
}

impl StatusTimes {
    pub fn get(&self, status: PresenceStatus) -> f64 {
        match status {
            PresenceStatus::Online => self.online,
            PresenceStatus::Busy => self.busy,
            PresenceStatus::Away => self.away,
            PresenceStatus::Dnd => self.dnd,
            PresenceStatus::Offline => self.offline,
        }
    }

    pub fn add(&mut self, status: PresenceStatus, seconds: f64) {
        let slot = match status {
            PresenceStatus::Online => &mut self.online,
            PresenceStatus::Busy => &mut self.busy,
            PresenceStatus::Away => &mut self.away,
            PresenceStatus::Dnd => &mut self.dnd,
            PresenceStatus::Offline => &mut self.offline,
        };
        *slot += seconds;
    }

    /// busy / (busy + online) as a percentage, 0 when neither has elapsed
    pub fn utilization(&self) -> f64 {
        let worked = self.busy + self.online;
        if worked <= 0.0 {
            0.0
        } else {
            self.busy / worked * 100.0
        }
    }
}

/// Presence record of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPresence {
    pub agent_id: String,
    pub agent_name: String,
    pub status: PresenceStatus,
    pub status_reason: StatusReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Present iff the status is not offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_call_sid: Option<String>,
    pub queue_sids: BTreeSet<String>,
    pub skills: BTreeSet<String>,
    pub connected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub status_changed_at: DateTime<Utc>,
    /// Seconds per status since the start of today's session
    pub time_in_status: StatusTimes,
}

/// Registration request for [`crate::AgentPresenceService::register_agent`]
#[derive(Debug, Clone, Default)]
pub struct RegisterAgent {
    pub agent_id: String,
    pub connection_id: String,
    pub agent_name: Option<String>,
    pub requested_status: Option<PresenceStatus>,
    pub queue_sids: Vec<String>,
    pub skills: Vec<String>,
    pub device_id: Option<String>,
    pub client_type: Option<String>,
}

impl RegisterAgent {
    pub fn new(agent_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            connection_id: connection_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: PresenceStatus) -> Self {
        self.requested_status = Some(status);
        self
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue_sids = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }
}

/// Optional data carried along with a status change
#[derive(Debug, Clone, Default)]
pub struct StatusChangeExtra {
    pub active_call_sid: Option<String>,
    pub status_message: Option<String>,
}

/// Outcome of a successful status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous_status: PresenceStatus,
    pub status: PresenceStatus,
    /// False when the requested status equals the current one
    pub changed: bool,
}

/// Reply to an accepted heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub status: PresenceStatus,
    /// Server clock in epoch milliseconds
    pub server_time: i64,
    /// Epoch milliseconds by which the next heartbeat is expected
    pub next_heartbeat_due: i64,
    pub rtt_ms: i64,
}

/// Selection used by [`crate::AgentPresenceService::get_agents`]
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub statuses: Option<Vec<PresenceStatus>>,
    pub agent_ids: Option<Vec<String>>,
    pub queue_sid: Option<String>,
    pub skill: Option<String>,
    pub include_offline: bool,
}

impl AgentFilter {
    pub fn matches(&self, agent: &AgentPresence) -> bool {
        if !self.include_offline && agent.status == PresenceStatus::Offline {
            // An explicit offline status filter still selects offline agents
            let asked_for_offline = self
                .statuses
                .as_ref()
                .map(|s| s.contains(&PresenceStatus::Offline))
                .unwrap_or(false);
            if !asked_for_offline {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&agent.status) {
                return false;
            }
        }
        if let Some(ids) = &self.agent_ids {
            if !ids.iter().any(|id| id == &agent.agent_id) {
                return false;
            }
        }
        if let Some(queue) = &self.queue_sid {
            if !agent.queue_sids.contains(queue) {
                return false;
            }
        }
        if let Some(skill) = &self.skill {
            if !agent.skills.contains(skill) {
                return false;
            }
        }
        true
    }
}

/// Per-agent metrics for today's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent_id: String,
    pub current_status: PresenceStatus,
    /// Seconds in the current status so far
    pub current_status_secs: f64,
    pub time_in_status: StatusTimes,
    /// busy / (busy + online), percent
    pub utilization: f64,
    pub status_changes: u32,
    pub calls_handled: u32,
    pub session_started_at: DateTime<Utc>,
}

/// Agent counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub online: usize,
    pub busy: usize,
    pub away: usize,
    pub dnd: usize,
    pub offline: usize,
}

impl StatusCounts {
    pub fn increment(&mut self, status: PresenceStatus) {
        match status {
            PresenceStatus::Online => self.online += 1,
            PresenceStatus::Busy => self.busy += 1,
            PresenceStatus::Away => self.away += 1,
            PresenceStatus::Dnd => self.dnd += 1,
            PresenceStatus::Offline => self.offline += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.online + self.busy + self.away + self.dnd + self.offline
    }
}

/// Floor-wide presence summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub total_agents: usize,
    pub by_status: StatusCounts,
    /// Online agents without an active call
    pub available_agents: usize,
    pub agents_on_call: usize,
    pub average_utilization: f64,
    pub include_offline: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_is_busy_share_of_worked_time() {
        let mut times = StatusTimes::default();
        assert_eq!(times.utilization(), 0.0);
        times.add(PresenceStatus::Online, 30.0);
        times.add(PresenceStatus::Busy, 30.0);
        times.add(PresenceStatus::Away, 120.0);
        assert!((times.utilization() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&PresenceStatus::Dnd).unwrap(), "\"dnd\"");
        assert_eq!("BUSY".parse::<PresenceStatus>().unwrap(), PresenceStatus::Busy);
        let reason: StatusReason = serde_json::from_str("\"coffee_break\"").unwrap();
        assert_eq!(reason, StatusReason::Other);
        assert_eq!(
            serde_json::to_string(&StatusReason::HeartbeatTimeout).unwrap(),
            "\"heartbeat_timeout\""
        );
    }
}
