//! Supervision events

use crate::types::{
    EscalationRecord, HandoffRequest, MonitoredCall, MonitoringMode, SupervisorNote,
    SupervisorSession,
};
use callwatch_infra_common::NamedEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a supervisor stopped monitoring a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Stopped,
    SwitchedCall,
    CallEnded,
    SessionEnded,
    IdleTimeout,
    Shutdown,
}

/// Events emitted by [`crate::SupervisorAgent`].
///
/// Call, session and note events carry full snapshots so observers such as
/// a persistence bridge need no callback into the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    CallRegistered { call: MonitoredCall },
    CallUpdated { call: MonitoredCall },
    CallEnded { call: MonitoredCall },

    SessionCreated { session: SupervisorSession },
    SessionEnded { session: SupervisorSession, reason: LeaveReason },

    SupervisorJoined {
        session: SupervisorSession,
        call_sid: String,
        mode: MonitoringMode,
    },
    SupervisorLeft {
        session_id: String,
        supervisor_id: String,
        call_sid: String,
        reason: LeaveReason,
    },
    ModeChanged {
        session: SupervisorSession,
        call_sid: String,
        previous_mode: MonitoringMode,
        mode: MonitoringMode,
    },

    HandoffRequested { request: HandoffRequest },
    HandoffCompleted { request: HandoffRequest },

    EscalationAlert { escalation: EscalationRecord },
    NegativeSentimentAlert {
        call_sid: String,
        sentiment: f64,
        threshold: f64,
        detected_at: DateTime<Utc>,
    },

    NoteAdded { note: SupervisorNote },
}

impl SupervisorEvent {
    /// Call the event concerns, if any
    pub fn call_sid(&self) -> Option<&str> {
        match self {
            SupervisorEvent::CallRegistered { call }
            | SupervisorEvent::CallUpdated { call }
            | SupervisorEvent::CallEnded { call } => Some(&call.call_sid),
            SupervisorEvent::SupervisorJoined { call_sid, .. }
            | SupervisorEvent::SupervisorLeft { call_sid, .. }
            | SupervisorEvent::ModeChanged { call_sid, .. }
            | SupervisorEvent::NegativeSentimentAlert { call_sid, .. } => Some(call_sid),
            SupervisorEvent::HandoffRequested { request }
            | SupervisorEvent::HandoffCompleted { request } => Some(&request.call_sid),
            SupervisorEvent::EscalationAlert { escalation } => Some(&escalation.call_sid),
            SupervisorEvent::NoteAdded { note } => Some(&note.call_sid),
            SupervisorEvent::SessionCreated { .. } | SupervisorEvent::SessionEnded { .. } => None,
        }
    }

    /// Alerts that floor dashboards should surface
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            SupervisorEvent::EscalationAlert { .. }
                | SupervisorEvent::NegativeSentimentAlert { .. }
                | SupervisorEvent::HandoffRequested { .. }
        )
    }
}

impl NamedEvent for SupervisorEvent {
    fn event_name(&self) -> &'static str {
        match self {
            SupervisorEvent::CallRegistered { .. } => "call:registered",
            SupervisorEvent::CallUpdated { .. } => "call:updated",
            SupervisorEvent::CallEnded { .. } => "call:ended",
            SupervisorEvent::SessionCreated { .. } => "session:created",
            SupervisorEvent::SessionEnded { .. } => "session:ended",
            SupervisorEvent::SupervisorJoined { .. } => "supervisor:joined",
            SupervisorEvent::SupervisorLeft { .. } => "supervisor:left",
            SupervisorEvent::ModeChanged { .. } => "supervisor:mode-changed",
            SupervisorEvent::HandoffRequested { .. } => "handoff:requested",
            SupervisorEvent::HandoffCompleted { .. } => "handoff:completed",
            SupervisorEvent::EscalationAlert { .. } => "alert:escalation",
            SupervisorEvent::NegativeSentimentAlert { .. } => "alert:negative-sentiment",
            SupervisorEvent::NoteAdded { .. } => "note:added",
        }
    }
}
