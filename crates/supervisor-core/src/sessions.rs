//! Registry of supervisor sessions

use crate::error::{Result, SupervisorError};
use crate::permissions;
use crate::types::{MonitoringMode, SupervisorRole, SupervisorSession};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct SessionEntry {
    session: SupervisorSession,
    last_activity: Instant,
}

/// Owns every [`SupervisorSession`], keyed by session id
#[derive(Debug)]
pub struct SupervisorSessionRegistry {
    sessions: HashMap<String, SessionEntry>,
    max_sessions: usize,
}

impl SupervisorSessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, session_id: &str) -> Option<&SupervisorSession> {
        self.sessions.get(session_id).map(|e| &e.session)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupervisorSession> {
        self.sessions.values().map(|e| &e.session)
    }

    pub fn create(
        &mut self,
        supervisor_id: &str,
        supervisor_name: &str,
        role: SupervisorRole,
        tenant_id: Option<String>,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<SupervisorSession> {
        if self.sessions.len() >= self.max_sessions {
            return Err(SupervisorError::CapacityExceeded {
                resource: "supervisor session",
                limit: self.max_sessions,
            });
        }

        let session = SupervisorSession {
            session_id: Uuid::new_v4().to_string(),
            supervisor_id: supervisor_id.to_string(),
            supervisor_name: supervisor_name.to_string(),
            role,
            tenant_id,
            monitoring_mode: MonitoringMode::None,
            active_call_sid: None,
            calls_monitored: 0,
            interventions: 0,
            started_at: now_utc,
            last_activity_at: now_utc,
        };
        self.sessions.insert(
            session.session_id.clone(),
            SessionEntry {
                session: session.clone(),
                last_activity: now,
            },
        );
        Ok(session)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SupervisorSession> {
        self.sessions.remove(session_id).map(|e| e.session)
    }

    /// Look up a session and record activity on it
    fn touch(
        &mut self,
        session_id: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<&mut SupervisorSession> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SupervisorError::SessionNotFound(session_id.to_string()))?;
        entry.last_activity = now;
        entry.session.last_activity_at = now_utc;
        Ok(&mut entry.session)
    }

    /// Check that `session_id` exists and its role grants `mode`
    pub fn authorize(&self, session_id: &str, mode: MonitoringMode) -> Result<&SupervisorSession> {
        if mode == MonitoringMode::None {
            return Err(SupervisorError::InvalidMode(mode));
        }
        let session = self
            .get(session_id)
            .ok_or_else(|| SupervisorError::SessionNotFound(session_id.to_string()))?;
        if !permissions::can_use(session.role, mode) {
            return Err(SupervisorError::InsufficientPermissions {
                role: session.role,
                mode,
            });
        }
        Ok(session)
    }

    /// Point the session at a call. Authorization is the caller's job.
    pub fn begin_monitoring(
        &mut self,
        session_id: &str,
        call_sid: &str,
        mode: MonitoringMode,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<SupervisorSession> {
        let session = self.touch(session_id, now, now_utc)?;
        session.active_call_sid = Some(call_sid.to_string());
        session.monitoring_mode = mode;
        session.calls_monitored += 1;
        if mode.is_intervention() {
            session.interventions += 1;
        }
        Ok(session.clone())
    }

    /// Switch the mode of a monitoring session, returning the previous mode
    pub fn change_mode(
        &mut self,
        session_id: &str,
        mode: MonitoringMode,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<(MonitoringMode, SupervisorSession)> {
        let session = self.touch(session_id, now, now_utc)?;
        if !session.is_monitoring() {
            return Err(SupervisorError::NotMonitoring(session_id.to_string()));
        }
        let previous = session.monitoring_mode;
        if previous != mode {
            session.monitoring_mode = mode;
            if mode.is_intervention() {
                session.interventions += 1;
            }
        }
        Ok((previous, session.clone()))
    }

    /// Clear the session's call linkage, returning the call it was on
    pub fn end_monitoring(
        &mut self,
        session_id: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let session = self.touch(session_id, now, now_utc)?;
        session.monitoring_mode = MonitoringMode::None;
        Ok(session.active_call_sid.take())
    }

    /// Clear the call linkage of every session on `call_sid` without
    /// counting it as supervisor activity
    pub fn release_call(&mut self, call_sid: &str) -> Vec<SupervisorSession> {
        let mut released = Vec::new();
        for entry in self.sessions.values_mut() {
            if entry.session.active_call_sid.as_deref() == Some(call_sid) {
                entry.session.active_call_sid = None;
                entry.session.monitoring_mode = MonitoringMode::None;
                released.push(entry.session.clone());
            }
        }
        released
    }

    /// Sessions idle for at least `timeout`
    pub fn idle(&self, timeout: Duration, now: Instant) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_activity) >= timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn clear(&mut self) -> Vec<SupervisorSession> {
        self.sessions.drain().map(|(_, e)| e.session).collect()
    }
}
