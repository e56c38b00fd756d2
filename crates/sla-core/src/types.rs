//! SLA data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Point-in-time metrics of one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue_sid: String,
    pub queue_name: String,
    pub current_queue_size: u32,
    /// Seconds the oldest waiting call has waited
    pub longest_wait_time: u64,
    pub available_agents: u32,
    pub calls_handled_today: u32,
    pub calls_abandoned_today: u32,
    /// Percent of today's calls answered within the target answer time
    pub service_level: f64,
    pub captured_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Snapshot of an empty, fully staffed queue
    pub fn new(queue_sid: impl Into<String>) -> Self {
        let queue_sid = queue_sid.into();
        Self {
            queue_name: queue_sid.clone(),
            queue_sid,
            current_queue_size: 0,
            longest_wait_time: 0,
            available_agents: 1,
            calls_handled_today: 0,
            calls_abandoned_today: 0,
            service_level: 100.0,
            captured_at: Utc::now(),
        }
    }

    /// handled + abandoned
    pub fn calls_today(&self) -> u64 {
        u64::from(self.calls_handled_today) + u64::from(self.calls_abandoned_today)
    }

    /// abandoned / (handled + abandoned), percent
    pub fn abandon_rate(&self) -> f64 {
        let total = self.calls_today();
        if total == 0 {
            0.0
        } else {
            self.calls_abandoned_today as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachType {
    WaitTimeExceeded,
    QueueSizeExceeded,
    AgentAvailabilityLow,
    AbandonRateExceeded,
    ServiceLevelMissed,
}

impl BreachType {
    /// Evaluation order
    pub const ALL: [BreachType; 5] = [
        BreachType::WaitTimeExceeded,
        BreachType::QueueSizeExceeded,
        BreachType::AgentAvailabilityLow,
        BreachType::AbandonRateExceeded,
        BreachType::ServiceLevelMissed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreachType::WaitTimeExceeded => "wait_time_exceeded",
            BreachType::QueueSizeExceeded => "queue_size_exceeded",
            BreachType::AgentAvailabilityLow => "agent_availability_low",
            BreachType::AbandonRateExceeded => "abandon_rate_exceeded",
            BreachType::ServiceLevelMissed => "service_level_missed",
        }
    }
}

impl fmt::Display for BreachType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaBreachEvent {
    pub event_id: String,
    pub queue_sid: String,
    pub breach_type: BreachType,
    pub severity: Severity,
    pub threshold: f64,
    pub current_value: f64,
    pub affected_calls: u32,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub alert_sent: bool,
    pub escalated: bool,
}

impl SlaBreachEvent {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Compliance verdict for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaStatus {
    pub queue_sid: String,
    pub is_compliant: bool,
    pub severity: Severity,
    pub requires_alert: bool,
    pub requires_escalation: bool,
    pub service_level: f64,
    pub abandon_rate: f64,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaEvaluation {
    pub status: SlaStatus,
    pub breaches: Vec<SlaBreachEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Aggregated queue metrics over a reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalMetrics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_calls: u32,
    pub calls_within_sla: u32,
    pub calls_abandoned: u32,
    /// Seconds
    pub average_wait_time: f64,
    pub longest_wait_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaReport {
    pub report_id: String,
    pub queue_sid: String,
    pub queue_name: String,
    pub period_type: PeriodType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_calls: u32,
    /// callsWithinSla / totalCalls, percent
    pub overall_service_level: f64,
    /// callsAbandoned / totalCalls, percent
    pub abandon_rate: f64,
    pub average_wait_time: f64,
    pub longest_wait_time: u64,
    pub total_breaches: usize,
    pub breaches_by_type: BTreeMap<BreachType, usize>,
    pub critical_breaches: usize,
    pub generated_at: DateTime<Utc>,
}
