//! Queue SLA engine
//!
//! Stateful wrapper around [`evaluate_sla`]: per-queue thresholds, breach
//! history, continuation detection and resolution tracking.

use crate::config::{SlaConfig, SlaEngineConfig};
use crate::error::{Result, SlaError};
use crate::evaluate::{evaluate_sla, generate_report, is_breach_continuation};
use crate::history::SlaHistoryStore;
use crate::types::{
    BreachType, HistoricalMetrics, PeriodType, QueueSnapshot, Severity, SlaBreachEvent,
    SlaReport, SlaStatus,
};
use callwatch_infra_common::{EventBus, NamedEvent};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlaEvent {
    /// A breach that does not continue an unresolved one
    BreachDetected { breach: SlaBreachEvent },
    /// A new critical breach
    EscalationRequired { breach: SlaBreachEvent },
    /// A check passed again after failing
    BreachResolved {
        queue_sid: String,
        breach_type: BreachType,
        resolved: usize,
    },
}

impl NamedEvent for SlaEvent {
    fn event_name(&self) -> &'static str {
        match self {
            SlaEvent::BreachDetected { .. } => "sla:breach",
            SlaEvent::EscalationRequired { .. } => "sla:escalation",
            SlaEvent::BreachResolved { .. } => "sla:resolved",
        }
    }
}

/// Result of [`QueueSlaEngine::evaluate`]
#[derive(Debug, Clone, PartialEq)]
pub struct SlaOutcome {
    pub status: SlaStatus,
    /// Every breach recorded by this evaluation
    pub breaches: Vec<SlaBreachEvent>,
    /// Breaches that should be alerted on
    pub new_breaches: Vec<SlaBreachEvent>,
    /// Breach types that passed again and were resolved
    pub resolved: Vec<BreachType>,
}

struct EngineState {
    queues: BTreeMap<String, SlaConfig>,
    history: SlaHistoryStore,
}

pub struct QueueSlaEngine {
    defaults: SlaConfig,
    state: Mutex<EngineState>,
    events: EventBus<SlaEvent>,
}

impl QueueSlaEngine {
    pub fn new(config: SlaEngineConfig) -> Self {
        Self {
            state: Mutex::new(EngineState {
                queues: config.queues,
                history: SlaHistoryStore::new(config.history_limit, config.report_limit),
            }),
            events: EventBus::new("sla", config.event_buffer),
            defaults: config.defaults,
        }
    }

    pub fn events(&self) -> &EventBus<SlaEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SlaEvent> {
        self.events.subscribe()
    }

    pub fn set_queue_config(&self, queue_sid: &str, config: SlaConfig) -> Result<()> {
        config.validate()?;
        self.state.lock().queues.insert(queue_sid.to_string(), config);
        debug!(queue_sid, "queue SLA thresholds updated");
        Ok(())
    }

    pub fn remove_queue_config(&self, queue_sid: &str) -> Result<SlaConfig> {
        self.state
            .lock()
            .queues
            .remove(queue_sid)
            .ok_or_else(|| SlaError::QueueNotFound(queue_sid.to_string()))
    }

    /// Thresholds for a queue, falling back to the defaults
    pub fn queue_config(&self, queue_sid: &str) -> SlaConfig {
        self.state
            .lock()
            .queues
            .get(queue_sid)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Evaluate a snapshot, record its breaches and resolve the checks that
    /// now pass.
    ///
    /// A breach continuing an unresolved one within the continuation window
    /// is recorded but not alerted on, unless its severity is higher than
    /// every open breach of that type.
    pub fn evaluate(&self, snapshot: &QueueSnapshot) -> SlaOutcome {
        let now = Utc::now();
        let queue_sid = snapshot.queue_sid.as_str();
        let mut events = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            let config = state
                .queues
                .get(queue_sid)
                .cloned()
                .unwrap_or_else(|| self.defaults.clone());
            let evaluation = evaluate_sla(snapshot, &config, now);

            let mut breaches = Vec::with_capacity(evaluation.breaches.len());
            let mut new_breaches = Vec::new();
            for mut breach in evaluation.breaches {
                let open = state.history.unresolved(queue_sid, Some(breach.breach_type));
                let worse = open.iter().all(|b| b.severity < breach.severity);
                let continuation = !worse
                    && is_breach_continuation(&breach, &open, config.continuation_window_secs);

                if !continuation {
                    breach.alert_sent = config.alert_enabled;
                    breach.escalated = breach.severity == Severity::Critical;
                    events.push(SlaEvent::BreachDetected {
                        breach: breach.clone(),
                    });
                    if breach.escalated {
                        events.push(SlaEvent::EscalationRequired {
                            breach: breach.clone(),
                        });
                    }
                    new_breaches.push(breach.clone());
                }
                state.history.append(breach.clone());
                breaches.push(breach);
            }

            let mut resolved = Vec::new();
            for breach_type in BreachType::ALL {
                if breaches.iter().any(|b| b.breach_type == breach_type) {
                    continue;
                }
                let count = state.history.resolve(queue_sid, breach_type, now);
                if count > 0 {
                    resolved.push(breach_type);
                    events.push(SlaEvent::BreachResolved {
                        queue_sid: queue_sid.to_string(),
                        breach_type,
                        resolved: count,
                    });
                }
            }

            SlaOutcome {
                status: evaluation.status,
                breaches,
                new_breaches,
                resolved,
            }
        };

        for breach in &outcome.new_breaches {
            warn!(
                queue_sid,
                breach_type = %breach.breach_type,
                severity = %breach.severity,
                threshold = breach.threshold,
                current = breach.current_value,
                "SLA breach detected"
            );
        }
        for breach_type in &outcome.resolved {
            info!(queue_sid, %breach_type, "SLA breach resolved");
        }
        for event in events {
            self.events.emit(event);
        }
        outcome
    }

    /// Breach history of a queue, oldest first
    pub fn get_breach_history(&self, queue_sid: &str) -> Vec<SlaBreachEvent> {
        self.state.lock().history.breaches(queue_sid)
    }

    pub fn get_active_breaches(&self, queue_sid: &str) -> Vec<SlaBreachEvent> {
        self.state.lock().history.unresolved(queue_sid, None)
    }

    /// Build and store a report over the breaches recorded in the period
    pub fn generate_report(
        &self,
        queue_sid: &str,
        queue_name: &str,
        metrics: &HistoricalMetrics,
        period_type: PeriodType,
    ) -> SlaReport {
        let mut state = self.state.lock();
        let breaches =
            state
                .history
                .breaches_between(queue_sid, metrics.period_start, metrics.period_end);
        let report = generate_report(
            queue_sid,
            queue_name,
            metrics,
            &breaches,
            period_type,
            Utc::now(),
        );
        state.history.add_report(report.clone());
        report
    }

    /// Stored reports of a queue, newest first
    pub fn get_reports(&self, queue_sid: &str) -> Vec<SlaReport> {
        self.state.lock().history.reports(queue_sid)
    }

    /// Queues with any recorded history
    pub fn tracked_queues(&self) -> Vec<String> {
        self.state.lock().history.queues()
    }

    /// Drop all history and listeners
    pub fn destroy(&self) {
        self.state.lock().history.clear();
        self.events.clear();
    }
}
