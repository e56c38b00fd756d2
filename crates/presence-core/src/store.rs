//! In-memory presence registry
//!
//! Owns exactly one record per agent id and the connection index that keeps
//! connection ids unique across live agents. Records are never removed: an
//! agent that disconnects or times out stays in the store as offline so its
//! metrics for today remain queryable.

use crate::error::{PresenceError, Result};
use crate::transitions;
use crate::types::{
    AgentFilter, AgentMetrics, AgentPresence, PresenceStatus, RegisterAgent, StatusChange,
    StatusChangeExtra, StatusCounts, StatusReason, StatusTimes, TeamSummary,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// Incremental time accounting for one agent
#[derive(Debug, Clone)]
struct Accounting {
    last_transition: Instant,
    status_changes: u32,
    calls_handled: u32,
    day: NaiveDate,
    session_started_at: DateTime<Utc>,
}

impl Accounting {
    fn new(now: Instant, now_utc: DateTime<Utc>) -> Self {
        Self {
            last_transition: now,
            status_changes: 0,
            calls_handled: 0,
            day: now_utc.date_naive(),
            session_started_at: now_utc,
        }
    }

    fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.last_transition).as_secs_f64()
    }
}

#[derive(Debug, Clone)]
struct AgentRecord {
    presence: AgentPresence,
    accounting: Accounting,
    /// Connection held before the agent went offline
    last_connection_id: Option<String>,
    missed_heartbeats: u32,
}

impl AgentRecord {
    /// Fold the time spent in the current status into the accumulators
    fn flush(&mut self, now: Instant) {
        let elapsed = self.accounting.elapsed_secs(now);
        self.presence.time_in_status.add(self.presence.status, elapsed);
        self.accounting.last_transition = now;
    }

    /// Accumulated times including the still-running current status
    fn live_times(&self, now: Instant) -> StatusTimes {
        let mut times = self.presence.time_in_status;
        times.add(self.presence.status, self.accounting.elapsed_secs(now));
        times
    }

    fn snapshot(&self, now: Instant) -> AgentPresence {
        let mut presence = self.presence.clone();
        presence.time_in_status = self.live_times(now);
        presence
    }
}

/// Result of [`PresenceStore::register`]
#[derive(Debug, Clone)]
pub struct Registration {
    pub presence: AgentPresence,
    /// Status before this registration, `None` for a first registration
    pub previous_status: Option<PresenceStatus>,
    /// The agent's own connection that this registration superseded
    pub replaced_connection: Option<String>,
    /// Another agent that was bound to the same connection id and got retired
    pub displaced: Option<Retired>,
}

/// An agent forced offline
#[derive(Debug, Clone, PartialEq)]
pub struct Retired {
    pub agent_id: String,
    pub previous_status: PresenceStatus,
    pub connection_id: Option<String>,
    pub reason: StatusReason,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Outcome of [`PresenceStore::retire`]
#[derive(Debug, Clone, PartialEq)]
pub enum RetireOutcome {
    Unknown,
    AlreadyOffline,
    Retired(Retired),
}

/// In-memory registry of agent presence records
#[derive(Debug, Default)]
pub struct PresenceStore {
    agents: BTreeMap<String, AgentRecord>,
    /// connection id -> agent id, live agents only
    connections: HashMap<String, String>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Number of agents that are not offline
    pub fn live_count(&self) -> usize {
        self.agents
            .values()
            .filter(|r| r.presence.status.is_live())
            .count()
    }

    pub fn status_of(&self, agent_id: &str) -> Option<PresenceStatus> {
        self.agents.get(agent_id).map(|r| r.presence.status)
    }

    pub fn connection_of(&self, agent_id: &str) -> Option<&str> {
        self.agents
            .get(agent_id)
            .and_then(|r| r.presence.connection_id.as_deref())
    }

    pub fn agent_for_connection(&self, connection_id: &str) -> Option<&str> {
        self.connections.get(connection_id).map(String::as_str)
    }

    pub fn snapshot(&self, agent_id: &str, now: Instant) -> Option<AgentPresence> {
        self.agents.get(agent_id).map(|r| r.snapshot(now))
    }

    /// Agents matching `filter`, ordered by agent id
    pub fn list(&self, filter: &AgentFilter, now: Instant) -> Vec<AgentPresence> {
        self.agents
            .values()
            .filter(|r| filter.matches(&r.presence))
            .map(|r| r.snapshot(now))
            .collect()
    }

    /// Create or refresh an agent's record for a new connection.
    ///
    /// Capacity is checked by the caller. A live record is taken over: its
    /// old connection is released and reported in `replaced_connection`.
    pub fn register(
        &mut self,
        request: &RegisterAgent,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Registration {
        let mut displaced = None;
        if let Some(holder) = self.connections.get(&request.connection_id).cloned() {
            if holder != request.agent_id {
                if let RetireOutcome::Retired(retired) =
                    self.retire(&holder, StatusReason::ConnectionLost, now, now_utc)
                {
                    displaced = Some(retired);
                }
            }
        }

        let status = match request.requested_status {
            Some(status) if status.is_live() => status,
            _ => PresenceStatus::Online,
        };

        let mut previous_status = None;
        let mut replaced_connection = None;

        let presence = match self.agents.get_mut(&request.agent_id) {
            Some(record) => {
                previous_status = Some(record.presence.status);
                if let Some(old) = record.presence.connection_id.take() {
                    self.connections.remove(&old);
                    if old != request.connection_id {
                        replaced_connection = Some(old);
                    }
                }

                if record.accounting.day != now_utc.date_naive() {
                    record.accounting = Accounting::new(now, now_utc);
                    record.presence.time_in_status = StatusTimes::default();
                } else {
                    record.flush(now);
                }
                if record.presence.status != status {
                    record.accounting.status_changes += 1;
                    record.presence.status_changed_at = now_utc;
                }

                let presence = &mut record.presence;
                if let Some(name) = &request.agent_name {
                    presence.agent_name = name.clone();
                }
                if !request.queue_sids.is_empty() {
                    presence.queue_sids = request.queue_sids.iter().cloned().collect();
                }
                if !request.skills.is_empty() {
                    presence.skills = request.skills.iter().cloned().collect();
                }
                presence.status = status;
                presence.status_reason = if previous_status.map(|s| s.is_live()).unwrap_or(false) {
                    StatusReason::ConnectionRestored
                } else {
                    StatusReason::Login
                };
                presence.connection_id = Some(request.connection_id.clone());
                presence.device_id = request.device_id.clone();
                presence.client_type = request.client_type.clone();
                presence.connected_at = now_utc;
                presence.last_heartbeat_at = Some(now_utc);
                if status != PresenceStatus::Busy {
                    presence.active_call_sid = None;
                }
                record.last_connection_id = Some(request.connection_id.clone());
                record.missed_heartbeats = 0;
                record.snapshot(now)
            }
            None => {
                let presence = AgentPresence {
                    agent_id: request.agent_id.clone(),
                    agent_name: request
                        .agent_name
                        .clone()
                        .unwrap_or_else(|| request.agent_id.clone()),
                    status,
                    status_reason: StatusReason::Login,
                    status_message: None,
                    connection_id: Some(request.connection_id.clone()),
                    device_id: request.device_id.clone(),
                    client_type: request.client_type.clone(),
                    active_call_sid: None,
                    queue_sids: request.queue_sids.iter().cloned().collect(),
                    skills: request.skills.iter().cloned().collect(),
                    connected_at: now_utc,
                    last_heartbeat_at: Some(now_utc),
                    status_changed_at: now_utc,
                    time_in_status: StatusTimes::default(),
                };
                let record = AgentRecord {
                    presence,
                    accounting: Accounting::new(now, now_utc),
                    last_connection_id: Some(request.connection_id.clone()),
                    missed_heartbeats: 0,
                };
                let snapshot = record.snapshot(now);
                self.agents.insert(request.agent_id.clone(), record);
                snapshot
            }
        };

        self.connections
            .insert(request.connection_id.clone(), request.agent_id.clone());

        Registration {
            presence,
            previous_status,
            replaced_connection,
            displaced,
        }
    }

    /// Apply a status change checked against the adjacency table
    pub fn transition(
        &mut self,
        agent_id: &str,
        to: PresenceStatus,
        reason: StatusReason,
        extra: StatusChangeExtra,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| PresenceError::AgentNotFound(agent_id.to_string()))?;
        let from = record.presence.status;

        if from == to {
            return Ok(StatusChange {
                previous_status: from,
                status: to,
                changed: false,
            });
        }
        if !transitions::is_allowed(from, to) {
            return Err(PresenceError::InvalidTransition {
                agent_id: agent_id.to_string(),
                from,
                to,
            });
        }

        if from == PresenceStatus::Offline {
            // Coming back online re-binds the last connection the agent held
            let connection = record
                .last_connection_id
                .clone()
                .filter(|c| !self.connections.contains_key(c))
                .ok_or_else(|| PresenceError::NotConnected(agent_id.to_string()))?;
            self.connections.insert(connection.clone(), agent_id.to_string());
            record.presence.connection_id = Some(connection);
            record.missed_heartbeats = 0;
        }

        record.flush(now);
        if from == PresenceStatus::Busy && to == PresenceStatus::Online {
            record.accounting.calls_handled += 1;
        }
        record.accounting.status_changes += 1;

        let presence = &mut record.presence;
        presence.status = to;
        presence.status_reason = reason;
        presence.status_changed_at = now_utc;
        presence.status_message = extra.status_message;
        presence.active_call_sid = if to == PresenceStatus::Busy {
            extra.active_call_sid.or(presence.active_call_sid.take())
        } else {
            None
        };

        if to == PresenceStatus::Offline {
            if let Some(connection) = presence.connection_id.take() {
                self.connections.remove(&connection);
                record.last_connection_id = Some(connection);
            }
            record.missed_heartbeats = 0;
        }

        Ok(StatusChange {
            previous_status: from,
            status: to,
            changed: true,
        })
    }

    /// Force an agent offline from any status, releasing its connection
    pub fn retire(
        &mut self,
        agent_id: &str,
        reason: StatusReason,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> RetireOutcome {
        let Some(record) = self.agents.get_mut(agent_id) else {
            return RetireOutcome::Unknown;
        };
        let previous_status = record.presence.status;
        if !previous_status.is_live() {
            return RetireOutcome::AlreadyOffline;
        }

        record.flush(now);
        record.accounting.status_changes += 1;
        record.missed_heartbeats = 0;

        let presence = &mut record.presence;
        presence.status = PresenceStatus::Offline;
        presence.status_reason = reason;
        presence.status_changed_at = now_utc;
        presence.active_call_sid = None;
        let connection_id = presence.connection_id.take();
        if let Some(connection) = &connection_id {
            self.connections.remove(connection);
            record.last_connection_id = Some(connection.clone());
        }

        RetireOutcome::Retired(Retired {
            agent_id: agent_id.to_string(),
            previous_status,
            connection_id,
            reason,
            last_heartbeat_at: record.presence.last_heartbeat_at,
        })
    }

    /// Record a heartbeat from the agent's current connection.
    ///
    /// Returns the agent's status, or `None` when the agent is unknown,
    /// offline, or the connection is not the one it is bound to.
    pub fn record_heartbeat(
        &mut self,
        agent_id: &str,
        connection_id: &str,
        now_utc: DateTime<Utc>,
    ) -> Option<PresenceStatus> {
        let record = self.agents.get_mut(agent_id)?;
        if record.presence.connection_id.as_deref() != Some(connection_id) {
            return None;
        }
        record.presence.last_heartbeat_at = Some(now_utc);
        record.missed_heartbeats = 0;
        Some(record.presence.status)
    }

    /// Note a missed heartbeat interval for the given binding. Returns false
    /// when the binding is gone and the timer should stop.
    pub fn note_missed_heartbeat(
        &mut self,
        agent_id: &str,
        connection_id: &str,
        missed: u32,
    ) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(record) if record.presence.connection_id.as_deref() == Some(connection_id) => {
                record.missed_heartbeats = missed;
                true
            }
            _ => false,
        }
    }

    pub fn missed_heartbeats(&self, agent_id: &str) -> Option<u32> {
        self.agents.get(agent_id).map(|r| r.missed_heartbeats)
    }

    pub fn metrics(&self, agent_id: &str, now: Instant) -> Option<AgentMetrics> {
        let record = self.agents.get(agent_id)?;
        let times = record.live_times(now);
        Some(AgentMetrics {
            agent_id: agent_id.to_string(),
            current_status: record.presence.status,
            current_status_secs: record.accounting.elapsed_secs(now),
            time_in_status: times,
            utilization: times.utilization(),
            status_changes: record.accounting.status_changes,
            calls_handled: record.accounting.calls_handled,
            session_started_at: record.accounting.session_started_at,
        })
    }

    pub fn team_summary(
        &self,
        include_offline: bool,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> TeamSummary {
        let mut by_status = StatusCounts::default();
        let mut available_agents = 0;
        let mut agents_on_call = 0;
        let mut utilization_sum = 0.0;
        let mut counted = 0usize;

        for record in self.agents.values() {
            let status = record.presence.status;
            if !include_offline && status == PresenceStatus::Offline {
                continue;
            }
            by_status.increment(status);
            if status == PresenceStatus::Online && record.presence.active_call_sid.is_none() {
                available_agents += 1;
            }
            if record.presence.active_call_sid.is_some() {
                agents_on_call += 1;
            }
            utilization_sum += record.live_times(now).utilization();
            counted += 1;
        }

        TeamSummary {
            total_agents: counted,
            by_status,
            available_agents,
            agents_on_call,
            average_utilization: if counted == 0 {
                0.0
            } else {
                utilization_sum / counted as f64
            },
            include_offline,
            generated_at: now_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn register(store: &mut PresenceStore, agent: &str, conn: &str, now: Instant) -> Registration {
        store.register(&RegisterAgent::new(agent, conn), now, Utc::now())
    }

    #[test]
    fn one_record_per_agent_and_unique_connections() {
        let mut store = PresenceStore::new();
        let now = Instant::now();
        register(&mut store, "a1", "c1", now);
        let again = register(&mut store, "a1", "c2", now);

        assert_eq!(store.len(), 1);
        assert_eq!(again.replaced_connection.as_deref(), Some("c1"));
        assert_eq!(again.presence.status_reason, StatusReason::ConnectionRestored);
        assert_eq!(store.agent_for_connection("c1"), None);
        assert_eq!(store.agent_for_connection("c2"), Some("a1"));

        // A different agent claiming c2 retires a1
        let other = register(&mut store, "a2", "c2", now);
        let displaced = other.displaced.expect("a1 displaced");
        assert_eq!(displaced.agent_id, "a1");
        assert_eq!(store.status_of("a1"), Some(PresenceStatus::Offline));
        assert_eq!(store.connection_of("a1"), None);
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn offline_record_keeps_metrics_and_restores_connection() {
        let mut store = PresenceStore::new();
        let start = Instant::now();
        register(&mut store, "a1", "c1", start);

        let later = start + Duration::from_secs(10);
        let outcome = store.retire("a1", StatusReason::Logout, later, Utc::now());
        assert!(matches!(outcome, RetireOutcome::Retired(_)));
        assert_eq!(
            store.retire("a1", StatusReason::Logout, later, Utc::now()),
            RetireOutcome::AlreadyOffline
        );
        assert_eq!(
            store.retire("nobody", StatusReason::Logout, later, Utc::now()),
            RetireOutcome::Unknown
        );

        let metrics = store.metrics("a1", later).unwrap();
        assert!((metrics.time_in_status.online - 10.0).abs() < 1e-6);

        let change = store
            .transition(
                "a1",
                PresenceStatus::Online,
                StatusReason::Manual,
                StatusChangeExtra::default(),
                later,
                Utc::now(),
            )
            .unwrap();
        assert!(change.changed);
        assert_eq!(store.connection_of("a1"), Some("c1"));
    }

    #[test]
    fn busy_to_online_counts_a_handled_call() {
        let mut store = PresenceStore::new();
        let now = Instant::now();
        register(&mut store, "a1", "c1", now);

        let busy = StatusChangeExtra {
            active_call_sid: Some("CA1".into()),
            ..Default::default()
        };
        store
            .transition(
                "a1",
                PresenceStatus::Busy,
                StatusReason::CallStarted,
                busy,
                now,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(store.snapshot("a1", now).unwrap().active_call_sid.as_deref(), Some("CA1"));

        store
            .transition(
                "a1",
                PresenceStatus::Online,
                StatusReason::CallEnded,
                StatusChangeExtra::default(),
                now,
                Utc::now(),
            )
            .unwrap();
        let metrics = store.metrics("a1", now).unwrap();
        assert_eq!(metrics.calls_handled, 1);
        assert_eq!(metrics.status_changes, 2);
        assert_eq!(store.snapshot("a1", now).unwrap().active_call_sid, None);
    }

    #[test]
    fn heartbeat_from_stale_connection_is_ignored() {
        let mut store = PresenceStore::new();
        let now = Instant::now();
        register(&mut store, "a1", "c1", now);
        register(&mut store, "a1", "c2", now);

        assert_eq!(store.record_heartbeat("a1", "c1", Utc::now()), None);
        assert_eq!(
            store.record_heartbeat("a1", "c2", Utc::now()),
            Some(PresenceStatus::Online)
        );
        assert!(!store.note_missed_heartbeat("a1", "c1", 1));
        assert!(store.note_missed_heartbeat("a1", "c2", 1));
        assert_eq!(store.missed_heartbeats("a1"), Some(1));
    }
}
