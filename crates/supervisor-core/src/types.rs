//! Core types for live call supervision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// Transcript turns kept per call; older turns are dropped first
pub const TRANSCRIPT_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Ringing,
    InProgress,
    OnHold,
    WrappingUp,
    Completed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "ringing",
            CallState::InProgress => "in-progress",
            CallState::OnHold => "on-hold",
            CallState::WrappingUp => "wrapping-up",
            CallState::Completed => "completed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Markers attached to a live call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallFlag {
    EscalationRequested,
    AiHandoffNeeded,
    HighValueLead,
    NegativeSentiment,
    ComplianceReview,
}

impl CallFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallFlag::EscalationRequested => "escalation-requested",
            CallFlag::AiHandoffNeeded => "ai-handoff-needed",
            CallFlag::HighValueLead => "high-value-lead",
            CallFlag::NegativeSentiment => "negative-sentiment",
            CallFlag::ComplianceReview => "compliance-review",
        }
    }
}

impl fmt::Display for CallFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Customer,
    Assistant,
    Agent,
    Supervisor,
}

/// One utterance in a call transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// A call under supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredCall {
    pub call_sid: String,
    pub lead_id: Option<String>,
    /// Clinic/tenant the call belongs to
    pub tenant_id: Option<String>,
    pub direction: CallDirection,
    pub state: CallState,
    pub customer_phone: Option<String>,
    pub assistant_id: Option<String>,
    pub agent_id: Option<String>,
    pub sentiment: Option<f64>,
    /// Most recent turns, oldest first
    pub transcript: VecDeque<TranscriptTurn>,
    pub flags: BTreeSet<CallFlag>,
    /// Supervisor sessions currently monitoring this call
    pub supervisor_sessions: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredCall {
    pub(crate) fn push_turn(&mut self, turn: TranscriptTurn) {
        if self.transcript.len() == TRANSCRIPT_CAPACITY {
            self.transcript.pop_front();
        }
        self.transcript.push_back(turn);
    }

    pub fn has_flag(&self, flag: CallFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Handled by an assistant with no human agent assigned
    pub fn is_ai_handled(&self) -> bool {
        self.assistant_id.is_some() && self.agent_id.is_none()
    }
}

/// Parameters of [`crate::SupervisorAgent::register_call`]
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_sid: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub lead_id: Option<String>,
    pub tenant_id: Option<String>,
    pub customer_phone: Option<String>,
    pub assistant_id: Option<String>,
    pub agent_id: Option<String>,
}

impl NewCall {
    pub fn new(call_sid: impl Into<String>, direction: CallDirection) -> Self {
        Self {
            call_sid: call_sid.into(),
            direction,
            state: CallState::Ringing,
            lead_id: None,
            tenant_id: None,
            customer_phone: None,
            assistant_id: None,
            agent_id: None,
        }
    }

    pub fn with_state(mut self, state: CallState) -> Self {
        self.state = state;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_lead(mut self, lead_id: impl Into<String>) -> Self {
        self.lead_id = Some(lead_id.into());
        self
    }

    pub fn with_customer_phone(mut self, phone: impl Into<String>) -> Self {
        self.customer_phone = Some(phone.into());
        self
    }
}

/// Partial update applied by [`crate::SupervisorAgent::update_call`]
#[derive(Debug, Clone, Default)]
pub struct CallUpdate {
    pub state: Option<CallState>,
    pub agent_id: Option<String>,
    pub assistant_id: Option<String>,
    pub customer_phone: Option<String>,
    pub lead_id: Option<String>,
    pub add_flags: Vec<CallFlag>,
    pub remove_flags: Vec<CallFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorRole {
    Supervisor,
    Manager,
    Admin,
}

impl SupervisorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorRole::Supervisor => "supervisor",
            SupervisorRole::Manager => "manager",
            SupervisorRole::Admin => "admin",
        }
    }
}

impl fmt::Display for SupervisorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of intervention on a live call, least invasive first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringMode {
    None,
    Listen,
    Whisper,
    Barge,
    Coach,
}

impl MonitoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringMode::None => "none",
            MonitoringMode::Listen => "listen",
            MonitoringMode::Whisper => "whisper",
            MonitoringMode::Barge => "barge",
            MonitoringMode::Coach => "coach",
        }
    }

    /// Every mode other than listen is heard by at least one party
    pub fn is_intervention(&self) -> bool {
        !matches!(self, MonitoringMode::None | MonitoringMode::Listen)
    }
}

impl fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logged-in supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSession {
    pub session_id: String,
    pub supervisor_id: String,
    pub supervisor_name: String,
    pub role: SupervisorRole,
    pub tenant_id: Option<String>,
    pub monitoring_mode: MonitoringMode,
    /// Set iff `monitoring_mode` is not `none`
    pub active_call_sid: Option<String>,
    pub calls_monitored: u32,
    pub interventions: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SupervisorSession {
    pub fn is_monitoring(&self) -> bool {
        self.active_call_sid.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorNote {
    pub note_id: String,
    pub call_sid: String,
    pub supervisor_id: String,
    pub content: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// AI-to-human handoff of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub handoff_id: String,
    pub call_sid: String,
    pub reason: String,
    pub priority: HandoffPriority,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// Human agent that took the call
    pub assigned_agent_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HandoffRequest {
    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Escalation raised by a keyword hit in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRecord {
    pub escalation_id: String,
    pub call_sid: String,
    pub tenant_id: Option<String>,
    pub keyword: String,
    pub text: String,
    pub detected_at: DateTime<Utc>,
}

/// Floor-level supervision figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub active_calls: usize,
    /// Live calls still ringing
    pub calls_in_queue: usize,
    pub ai_handled_calls: usize,
    /// Live calls carrying at least one flag
    pub active_alerts: usize,
    pub active_supervisors: usize,
    pub monitoring_sessions: usize,
    pub calls_today: u32,
    pub completed_today: u32,
    pub escalations_today: u32,
    pub handoffs_today: u32,
    pub average_sentiment: Option<f64>,
}
