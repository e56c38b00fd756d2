//! Bounded per-queue breach and report history

use crate::types::{BreachType, SlaBreachEvent, SlaReport};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct QueueHistory {
    breaches: VecDeque<SlaBreachEvent>,
    reports: VecDeque<SlaReport>,
}

/// Append-only breach history per queue. The oldest records are dropped
/// once a queue holds `limit` of them.
#[derive(Debug)]
pub struct SlaHistoryStore {
    queues: HashMap<String, QueueHistory>,
    breach_limit: usize,
    report_limit: usize,
}

impl SlaHistoryStore {
    pub fn new(breach_limit: usize, report_limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            breach_limit: breach_limit.max(1),
            report_limit: report_limit.max(1),
        }
    }

    pub fn append(&mut self, breach: SlaBreachEvent) {
        let history = self.queues.entry(breach.queue_sid.clone()).or_default();
        if history.breaches.len() == self.breach_limit {
            history.breaches.pop_front();
        }
        history.breaches.push_back(breach);
    }

    /// Breaches of a queue, oldest first
    pub fn breaches(&self, queue_sid: &str) -> Vec<SlaBreachEvent> {
        self.queues
            .get(queue_sid)
            .map(|h| h.breaches.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn breaches_between(
        &self,
        queue_sid: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<SlaBreachEvent> {
        self.queues
            .get(queue_sid)
            .map(|h| {
                h.breaches
                    .iter()
                    .filter(|b| b.detected_at >= start && b.detected_at <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unresolved breaches of a queue, optionally of one type
    pub fn unresolved(
        &self,
        queue_sid: &str,
        breach_type: Option<BreachType>,
    ) -> Vec<SlaBreachEvent> {
        self.queues
            .get(queue_sid)
            .map(|h| {
                h.breaches
                    .iter()
                    .filter(|b| !b.is_resolved())
                    .filter(|b| breach_type.map(|t| t == b.breach_type).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark every unresolved breach of `breach_type` resolved, returning
    /// how many were
    pub fn resolve(
        &mut self,
        queue_sid: &str,
        breach_type: BreachType,
        at: DateTime<Utc>,
    ) -> usize {
        let Some(history) = self.queues.get_mut(queue_sid) else {
            return 0;
        };
        let mut resolved = 0;
        for breach in history
            .breaches
            .iter_mut()
            .filter(|b| b.breach_type == breach_type && !b.is_resolved())
        {
            breach.resolved_at = Some(at);
            resolved += 1;
        }
        resolved
    }

    pub fn add_report(&mut self, report: SlaReport) {
        let history = self.queues.entry(report.queue_sid.clone()).or_default();
        if history.reports.len() == self.report_limit {
            history.reports.pop_front();
        }
        history.reports.push_back(report);
    }

    /// Reports of a queue, newest first
    pub fn reports(&self, queue_sid: &str) -> Vec<SlaReport> {
        self.queues
            .get(queue_sid)
            .map(|h| h.reports.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<_> = self.queues.keys().cloned().collect();
        queues.sort();
        queues
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn breach(queue: &str, breach_type: BreachType, n: usize) -> SlaBreachEvent {
        SlaBreachEvent {
            event_id: format!("{queue}-{n}"),
            queue_sid: queue.into(),
            breach_type,
            severity: Severity::Warning,
            threshold: 1.0,
            current_value: 2.0,
            affected_calls: 1,
            detected_at: Utc::now(),
            resolved_at: None,
            alert_sent: false,
            escalated: false,
        }
    }

    #[test]
    fn history_is_bounded_per_queue() {
        let mut store = SlaHistoryStore::new(3, 3);
        for n in 0..5 {
            store.append(breach("WQ1", BreachType::WaitTimeExceeded, n));
        }
        store.append(breach("WQ2", BreachType::WaitTimeExceeded, 0));

        let ids: Vec<_> = store.breaches("WQ1").into_iter().map(|b| b.event_id).collect();
        assert_eq!(ids, vec!["WQ1-2", "WQ1-3", "WQ1-4"]);
        assert_eq!(store.breaches("WQ2").len(), 1);
        assert_eq!(store.queues(), vec!["WQ1".to_string(), "WQ2".to_string()]);
    }

    #[test]
    fn resolve_touches_only_one_type() {
        let mut store = SlaHistoryStore::new(10, 10);
        store.append(breach("WQ1", BreachType::WaitTimeExceeded, 0));
        store.append(breach("WQ1", BreachType::WaitTimeExceeded, 1));
        store.append(breach("WQ1", BreachType::QueueSizeExceeded, 2));

        assert_eq!(store.resolve("WQ1", BreachType::WaitTimeExceeded, Utc::now()), 2);
        assert_eq!(store.resolve("WQ1", BreachType::WaitTimeExceeded, Utc::now()), 0);
        assert_eq!(store.resolve("nope", BreachType::WaitTimeExceeded, Utc::now()), 0);

        let open = store.unresolved("WQ1", None);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].breach_type, BreachType::QueueSizeExceeded);
    }
}
