//! Durable storage port for supervision data
//!
//! The supervisor agent never calls storage itself. A caller layer mirrors
//! agent events into a [`SupervisionStore`] asynchronously, so storage
//! latency and failures never gate in-memory state.

use crate::types::{
    CallFlag, CallState, DashboardStats, EscalationRecord, HandoffRequest, MonitoredCall,
    SupervisorNote, SupervisorSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Read/write contract for calls, sessions, notes, escalations and handoffs.
///
/// List queries take an optional tenant (clinic) id; `None` means all
/// tenants.
#[async_trait]
pub trait SupervisionStore: Send + Sync {
    async fn save_call(&self, call: &MonitoredCall) -> StorageResult<()>;
    async fn get_call(&self, call_sid: &str) -> StorageResult<Option<MonitoredCall>>;
    async fn update_call(&self, call: &MonitoredCall) -> StorageResult<()>;
    async fn delete_call(&self, call_sid: &str) -> StorageResult<bool>;

    async fn save_session(&self, session: &SupervisorSession) -> StorageResult<()>;
    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SupervisorSession>>;
    async fn update_session(&self, session: &SupervisorSession) -> StorageResult<()>;
    async fn delete_session(&self, session_id: &str) -> StorageResult<bool>;

    async fn save_note(&self, note: &SupervisorNote) -> StorageResult<()>;
    async fn get_notes(&self, call_sid: &str) -> StorageResult<Vec<SupervisorNote>>;

    async fn record_escalation(&self, escalation: &EscalationRecord) -> StorageResult<()>;
    async fn record_handoff(&self, request: &HandoffRequest) -> StorageResult<()>;
    async fn complete_handoff(&self, request: &HandoffRequest) -> StorageResult<()>;

    async fn get_active_calls(&self, tenant_id: Option<&str>) -> StorageResult<Vec<MonitoredCall>>;
    async fn get_calls_by_flag(
        &self,
        flag: CallFlag,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<MonitoredCall>>;
    async fn get_active_sessions(
        &self,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<SupervisorSession>>;
    async fn get_dashboard_stats(&self, tenant_id: Option<&str>) -> StorageResult<DashboardStats>;

    /// Delete sessions with no activity since `cutoff`
    async fn cleanup_expired_sessions(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
    /// Delete completed calls last updated before `cutoff`
    async fn cleanup_completed_calls(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}

fn tenant_matches(record: Option<&String>, tenant_id: Option<&str>) -> bool {
    match tenant_id {
        Some(tenant) => record.map(String::as_str) == Some(tenant),
        None => true,
    }
}

/// Process-local [`SupervisionStore`]
#[derive(Default)]
pub struct InMemoryStore {
    calls: DashMap<String, MonitoredCall>,
    sessions: DashMap<String, SupervisorSession>,
    notes: DashMap<String, Vec<SupervisorNote>>,
    handoffs: DashMap<String, HandoffRequest>,
    escalations: RwLock<Vec<EscalationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escalations(&self) -> Vec<EscalationRecord> {
        self.escalations.read().clone()
    }

    pub fn handoff(&self, handoff_id: &str) -> Option<HandoffRequest> {
        self.handoffs.get(handoff_id).map(|h| h.clone())
    }
}

#[async_trait]
impl SupervisionStore for InMemoryStore {
    async fn save_call(&self, call: &MonitoredCall) -> StorageResult<()> {
        self.calls.insert(call.call_sid.clone(), call.clone());
        Ok(())
    }

    async fn get_call(&self, call_sid: &str) -> StorageResult<Option<MonitoredCall>> {
        Ok(self.calls.get(call_sid).map(|c| c.clone()))
    }

    async fn update_call(&self, call: &MonitoredCall) -> StorageResult<()> {
        match self.calls.get_mut(&call.call_sid) {
            Some(mut existing) => {
                *existing = call.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(call.call_sid.clone())),
        }
    }

    async fn delete_call(&self, call_sid: &str) -> StorageResult<bool> {
        self.notes.remove(call_sid);
        Ok(self.calls.remove(call_sid).is_some())
    }

    async fn save_session(&self, session: &SupervisorSession) -> StorageResult<()> {
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SupervisorSession>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn update_session(&self, session: &SupervisorSession) -> StorageResult<()> {
        match self.sessions.get_mut(&session.session_id) {
            Some(mut existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(session.session_id.clone())),
        }
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn save_note(&self, note: &SupervisorNote) -> StorageResult<()> {
        self.notes
            .entry(note.call_sid.clone())
            .or_default()
            .push(note.clone());
        Ok(())
    }

    async fn get_notes(&self, call_sid: &str) -> StorageResult<Vec<SupervisorNote>> {
        Ok(self
            .notes
            .get(call_sid)
            .map(|n| n.clone())
            .unwrap_or_default())
    }

    async fn record_escalation(&self, escalation: &EscalationRecord) -> StorageResult<()> {
        self.escalations.write().push(escalation.clone());
        Ok(())
    }

    async fn record_handoff(&self, request: &HandoffRequest) -> StorageResult<()> {
        self.handoffs
            .insert(request.handoff_id.clone(), request.clone());
        Ok(())
    }

    async fn complete_handoff(&self, request: &HandoffRequest) -> StorageResult<()> {
        match self.handoffs.get_mut(&request.handoff_id) {
            Some(mut existing) => {
                existing.assigned_agent_id = request.assigned_agent_id.clone();
                existing.completed_at = request.completed_at;
                Ok(())
            }
            None => Err(StorageError::NotFound(request.handoff_id.clone())),
        }
    }

    async fn get_active_calls(&self, tenant_id: Option<&str>) -> StorageResult<Vec<MonitoredCall>> {
        Ok(self
            .calls
            .iter()
            .filter(|c| {
                c.state != CallState::Completed && tenant_matches(c.tenant_id.as_ref(), tenant_id)
            })
            .map(|c| c.clone())
            .collect())
    }

    async fn get_calls_by_flag(
        &self,
        flag: CallFlag,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<MonitoredCall>> {
        Ok(self
            .calls
            .iter()
            .filter(|c| {
                c.state != CallState::Completed
                    && c.has_flag(flag)
                    && tenant_matches(c.tenant_id.as_ref(), tenant_id)
            })
            .map(|c| c.clone())
            .collect())
    }

    async fn get_active_sessions(
        &self,
        tenant_id: Option<&str>,
    ) -> StorageResult<Vec<SupervisorSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| tenant_matches(s.tenant_id.as_ref(), tenant_id))
            .map(|s| s.clone())
            .collect())
    }

    async fn get_dashboard_stats(&self, tenant_id: Option<&str>) -> StorageResult<DashboardStats> {
        let today = Utc::now().date_naive();
        let mut stats = DashboardStats::default();

        for call in self.calls.iter() {
            if !tenant_matches(call.tenant_id.as_ref(), tenant_id) {
                continue;
            }
            if call.started_at.date_naive() == today {
                stats.calls_today += 1;
            }
            if call.state == CallState::Completed {
                if call.updated_at.date_naive() == today {
                    stats.completed_today += 1;
                }
                continue;
            }
            stats.active_calls += 1;
            if call.state == CallState::Ringing {
                stats.calls_in_queue += 1;
            }
            if call.is_ai_handled() {
                stats.ai_handled_calls += 1;
            }
            if !call.flags.is_empty() {
                stats.active_alerts += 1;
            }
        }

        for session in self.sessions.iter() {
            if tenant_matches(session.tenant_id.as_ref(), tenant_id) {
                stats.active_supervisors += 1;
                if session.is_monitoring() {
                    stats.monitoring_sessions += 1;
                }
            }
        }

        stats.escalations_today = self
            .escalations
            .read()
            .iter()
            .filter(|e| {
                e.detected_at.date_naive() == today
                    && tenant_matches(e.tenant_id.as_ref(), tenant_id)
            })
            .count() as u32;

        stats.handoffs_today = self
            .handoffs
            .iter()
            .filter(|h| h.requested_at.date_naive() == today)
            .filter(|h| {
                tenant_id.is_none()
                    || self
                        .calls
                        .get(&h.call_sid)
                        .map(|c| tenant_matches(c.tenant_id.as_ref(), tenant_id))
                        .unwrap_or(false)
            })
            .count() as u32;

        Ok(stats)
    }

    async fn cleanup_expired_sessions(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_activity_at >= cutoff);
        Ok(before - self.sessions.len())
    }

    async fn cleanup_completed_calls(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let expired: Vec<String> = self
            .calls
            .iter()
            .filter(|c| c.state == CallState::Completed && c.updated_at < cutoff)
            .map(|c| c.call_sid.clone())
            .collect();
        for call_sid in &expired {
            self.calls.remove(call_sid);
            self.notes.remove(call_sid);
        }
        Ok(expired.len())
    }
}
