//! Pure SLA evaluation and reporting

use crate::config::SlaConfig;
use crate::types::{
    BreachType, HistoricalMetrics, PeriodType, QueueSnapshot, Severity, SlaBreachEvent,
    SlaEvaluation, SlaReport, SlaStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Warning at `warning`, critical at `critical`, both inclusive
fn tiered(value: f64, warning: f64, critical: f64) -> Option<(Severity, f64)> {
    if value >= critical {
        Some((Severity::Critical, critical))
    } else if value >= warning {
        Some((Severity::Warning, warning))
    } else {
        None
    }
}

fn breach(
    snapshot: &QueueSnapshot,
    breach_type: BreachType,
    severity: Severity,
    threshold: f64,
    current_value: f64,
    affected_calls: u32,
    now: DateTime<Utc>,
) -> SlaBreachEvent {
    SlaBreachEvent {
        event_id: Uuid::new_v4().to_string(),
        queue_sid: snapshot.queue_sid.clone(),
        breach_type,
        severity,
        threshold,
        current_value,
        affected_calls,
        detected_at: now,
        resolved_at: None,
        alert_sent: false,
        escalated: false,
    }
}

/// Check a queue snapshot against its thresholds.
///
/// Each check yields at most one breach, in [`BreachType::ALL`] order.
pub fn evaluate_sla(
    snapshot: &QueueSnapshot,
    config: &SlaConfig,
    now: DateTime<Utc>,
) -> SlaEvaluation {
    let mut breaches = Vec::new();

    let wait = snapshot.longest_wait_time as f64;
    if let Some((severity, threshold)) = tiered(
        wait,
        config.max_wait_time as f64,
        config.critical_wait_time as f64,
    ) {
        breaches.push(breach(
            snapshot,
            BreachType::WaitTimeExceeded,
            severity,
            threshold,
            wait,
            snapshot.current_queue_size,
            now,
        ));
    }

    let size = snapshot.current_queue_size as f64;
    if let Some((severity, threshold)) = tiered(
        size,
        config.max_queue_size as f64,
        config.critical_queue_size as f64,
    ) {
        breaches.push(breach(
            snapshot,
            BreachType::QueueSizeExceeded,
            severity,
            threshold,
            size,
            snapshot.current_queue_size,
            now,
        ));
    }

    if snapshot.available_agents == 0 && snapshot.current_queue_size > 0 {
        breaches.push(breach(
            snapshot,
            BreachType::AgentAvailabilityLow,
            Severity::Warning,
            1.0,
            0.0,
            snapshot.current_queue_size,
            now,
        ));
    }

    let abandon_rate = snapshot.abandon_rate();
    let sample = snapshot.calls_today();
    if sample >= u64::from(config.min_calls_for_abandon_rate)
        && abandon_rate > config.max_abandon_rate
    {
        let severity = if abandon_rate >= config.max_abandon_rate * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        breaches.push(breach(
            snapshot,
            BreachType::AbandonRateExceeded,
            severity,
            config.max_abandon_rate,
            abandon_rate,
            snapshot.calls_abandoned_today,
            now,
        ));
    }

    if snapshot.service_level < config.service_level_target {
        breaches.push(breach(
            snapshot,
            BreachType::ServiceLevelMissed,
            Severity::Warning,
            config.service_level_target,
            snapshot.service_level,
            snapshot.current_queue_size,
            now,
        ));
    }

    let severity = breaches
        .iter()
        .map(|b| b.severity)
        .max()
        .unwrap_or(Severity::Ok);
    let is_compliant = breaches.is_empty();

    SlaEvaluation {
        status: SlaStatus {
            queue_sid: snapshot.queue_sid.clone(),
            is_compliant,
            severity,
            requires_alert: !is_compliant && config.alert_enabled,
            requires_escalation: severity == Severity::Critical,
            service_level: snapshot.service_level,
            abandon_rate,
            evaluated_at: now,
        },
        breaches,
    }
}

/// Whether `new_breach` continues an unresolved breach of the same type on
/// the same queue detected within `window_secs` of it
pub fn is_breach_continuation(
    new_breach: &SlaBreachEvent,
    existing: &[SlaBreachEvent],
    window_secs: u64,
) -> bool {
    let window = Duration::seconds(window_secs as i64);
    existing.iter().any(|b| {
        b.event_id != new_breach.event_id
            && b.queue_sid == new_breach.queue_sid
            && b.breach_type == new_breach.breach_type
            && !b.is_resolved()
            && (new_breach.detected_at - b.detected_at).abs() <= window
    })
}

/// Summarize a period. `period_type` only labels the report.
pub fn generate_report(
    queue_sid: &str,
    queue_name: &str,
    metrics: &HistoricalMetrics,
    breaches: &[SlaBreachEvent],
    period_type: PeriodType,
    now: DateTime<Utc>,
) -> SlaReport {
    let percent = |part: u32, empty: f64| {
        if metrics.total_calls == 0 {
            empty
        } else {
            part as f64 / metrics.total_calls as f64 * 100.0
        }
    };

    let mut breaches_by_type = BTreeMap::new();
    for breach in breaches {
        *breaches_by_type.entry(breach.breach_type).or_insert(0) += 1;
    }

    SlaReport {
        report_id: Uuid::new_v4().to_string(),
        queue_sid: queue_sid.to_string(),
        queue_name: queue_name.to_string(),
        period_type,
        period_start: metrics.period_start,
        period_end: metrics.period_end,
        total_calls: metrics.total_calls,
        overall_service_level: percent(metrics.calls_within_sla, 100.0),
        abandon_rate: percent(metrics.calls_abandoned, 0.0),
        average_wait_time: metrics.average_wait_time,
        longest_wait_time: metrics.longest_wait_time,
        total_breaches: breaches.len(),
        breaches_by_type,
        critical_breaches: breaches
            .iter()
            .filter(|b| b.severity == Severity::Critical)
            .count(),
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot() -> QueueSnapshot {
        QueueSnapshot {
            current_queue_size: 3,
            available_agents: 2,
            ..QueueSnapshot::new("WQ1")
        }
    }

    fn types(evaluation: &SlaEvaluation) -> Vec<(BreachType, Severity)> {
        evaluation
            .breaches
            .iter()
            .map(|b| (b.breach_type, b.severity))
            .collect()
    }

    #[test]
    fn healthy_queue_is_compliant() {
        let evaluation = evaluate_sla(&snapshot(), &SlaConfig::default(), Utc::now());
        assert!(evaluation.status.is_compliant);
        assert_eq!(evaluation.status.severity, Severity::Ok);
        assert!(!evaluation.status.requires_alert);
        assert!(evaluation.breaches.is_empty());
    }

    #[test]
    fn wait_time_warning_then_critical() {
        let config = SlaConfig::default();

        let warning = evaluate_sla(
            &QueueSnapshot {
                longest_wait_time: 150,
                ..snapshot()
            },
            &config,
            Utc::now(),
        );
        assert_eq!(
            types(&warning),
            vec![(BreachType::WaitTimeExceeded, Severity::Warning)]
        );
        assert_eq!(warning.breaches[0].threshold, 120.0);
        assert!(warning.status.requires_alert);
        assert!(!warning.status.requires_escalation);

        let critical = evaluate_sla(
            &QueueSnapshot {
                longest_wait_time: 350,
                ..snapshot()
            },
            &config,
            Utc::now(),
        );
        assert_eq!(
            types(&critical),
            vec![(BreachType::WaitTimeExceeded, Severity::Critical)]
        );
        assert_eq!(critical.status.severity, Severity::Critical);
        assert!(critical.status.requires_escalation);
    }

    #[test]
    fn abandon_rate_needs_minimum_sample() {
        let config = SlaConfig::default();
        let small_day = QueueSnapshot {
            calls_handled_today: 1,
            calls_abandoned_today: 8,
            ..snapshot()
        };
        assert!(evaluate_sla(&small_day, &config, Utc::now()).breaches.is_empty());

        let warning_day = QueueSnapshot {
            calls_handled_today: 93,
            calls_abandoned_today: 7,
            ..snapshot()
        };
        assert_eq!(
            types(&evaluate_sla(&warning_day, &config, Utc::now())),
            vec![(BreachType::AbandonRateExceeded, Severity::Warning)]
        );

        let critical_day = QueueSnapshot {
            calls_handled_today: 18,
            calls_abandoned_today: 2,
            ..snapshot()
        };
        assert_eq!(
            types(&evaluate_sla(&critical_day, &config, Utc::now())),
            vec![(BreachType::AbandonRateExceeded, Severity::Critical)]
        );
    }

    #[test]
    fn abandon_rate_handles_counter_extremes() {
        let config = SlaConfig::default();
        let busy_day = QueueSnapshot {
            calls_handled_today: u32::MAX,
            calls_abandoned_today: 1,
            ..snapshot()
        };
        assert_eq!(busy_day.calls_today(), u64::from(u32::MAX) + 1);
        assert!(busy_day.abandon_rate() < 0.001);
        assert!(evaluate_sla(&busy_day, &config, Utc::now()).breaches.is_empty());

        let saturated = QueueSnapshot {
            calls_handled_today: u32::MAX,
            calls_abandoned_today: u32::MAX,
            ..snapshot()
        };
        assert_eq!(saturated.abandon_rate(), 50.0);
        assert_eq!(
            types(&evaluate_sla(&saturated, &config, Utc::now())),
            vec![(BreachType::AbandonRateExceeded, Severity::Critical)]
        );
    }

    #[test]
    fn checks_run_in_order_and_severity_is_the_max() {
        let overloaded = QueueSnapshot {
            current_queue_size: 12,
            longest_wait_time: 130,
            available_agents: 0,
            service_level: 60.0,
            ..snapshot()
        };
        let config = SlaConfig {
            alert_enabled: false,
            ..Default::default()
        };
        let evaluation = evaluate_sla(&overloaded, &config, Utc::now());
        assert_eq!(
            types(&evaluation),
            vec![
                (BreachType::WaitTimeExceeded, Severity::Warning),
                (BreachType::QueueSizeExceeded, Severity::Warning),
                (BreachType::AgentAvailabilityLow, Severity::Warning),
                (BreachType::ServiceLevelMissed, Severity::Warning),
            ]
        );
        assert_eq!(evaluation.status.severity, Severity::Warning);
        assert!(!evaluation.status.is_compliant);
        assert!(!evaluation.status.requires_alert);
    }

    #[test]
    fn empty_queue_without_agents_is_fine() {
        let idle = QueueSnapshot {
            current_queue_size: 0,
            available_agents: 0,
            ..snapshot()
        };
        assert!(evaluate_sla(&idle, &SlaConfig::default(), Utc::now()).status.is_compliant);
    }

    #[test]
    fn continuation_requires_same_type_unresolved_and_in_window() {
        let now = Utc::now();
        let wait = |at: DateTime<Utc>| {
            let mut b = evaluate_sla(
                &QueueSnapshot {
                    longest_wait_time: 200,
                    ..snapshot()
                },
                &SlaConfig::default(),
                at,
            )
            .breaches
            .remove(0);
            b.detected_at = at;
            b
        };

        let earlier = wait(now - Duration::minutes(10));
        let new = wait(now);
        assert!(is_breach_continuation(&new, &[earlier.clone()], 900));
        assert!(!is_breach_continuation(&new, &[earlier.clone()], 300));

        let mut resolved = earlier.clone();
        resolved.resolved_at = Some(now);
        assert!(!is_breach_continuation(&new, &[resolved], 900));

        let mut other_type = earlier.clone();
        other_type.breach_type = BreachType::QueueSizeExceeded;
        assert!(!is_breach_continuation(&new, &[other_type], 900));

        let mut other_queue = earlier;
        other_queue.queue_sid = "WQ2".into();
        assert!(!is_breach_continuation(&new, &[other_queue], 900));

        // A breach never continues itself
        assert!(!is_breach_continuation(&new, &[new.clone()], 900));
    }

    #[test]
    fn report_arithmetic() {
        let now = Utc::now();
        let metrics = HistoricalMetrics {
            period_start: now - Duration::hours(1),
            period_end: now,
            total_calls: 200,
            calls_within_sla: 170,
            calls_abandoned: 10,
            average_wait_time: 14.5,
            longest_wait_time: 310,
        };
        let breaches: Vec<_> = [
            QueueSnapshot {
                longest_wait_time: 310,
                ..snapshot()
            },
            QueueSnapshot {
                longest_wait_time: 130,
                current_queue_size: 11,
                ..snapshot()
            },
        ]
        .iter()
        .flat_map(|s| evaluate_sla(s, &SlaConfig::default(), now).breaches)
        .collect();

        let report = generate_report("WQ1", "Sales", &metrics, &breaches, PeriodType::Hourly, now);
        assert_eq!(report.overall_service_level, 85.0);
        assert_eq!(report.abandon_rate, 5.0);
        assert_eq!(report.total_breaches, 3);
        assert_eq!(report.breaches_by_type[&BreachType::WaitTimeExceeded], 2);
        assert_eq!(report.breaches_by_type[&BreachType::QueueSizeExceeded], 1);
        assert_eq!(report.critical_breaches, 1);

        let empty = HistoricalMetrics {
            total_calls: 0,
            calls_within_sla: 0,
            calls_abandoned: 0,
            ..metrics
        };
        let report = generate_report("WQ1", "Sales", &empty, &[], PeriodType::Monthly, now);
        assert_eq!(report.overall_service_level, 100.0);
        assert_eq!(report.abandon_rate, 0.0);
    }
}
