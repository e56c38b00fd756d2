//! # callwatch-sla-core
//!
//! Queue service-level compliance.
//!
//! [`evaluate::evaluate_sla`], [`evaluate::is_breach_continuation`] and
//! [`evaluate::generate_report`] are pure functions. [`QueueSlaEngine`]
//! adds per-queue thresholds and a bounded breach history on top of them.

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod history;
pub mod types;

pub use config::{SlaConfig, SlaEngineConfig};
pub use engine::{QueueSlaEngine, SlaEvent, SlaOutcome};
pub use error::{Result, SlaError};
pub use evaluate::{evaluate_sla, generate_report, is_breach_continuation};
pub use history::SlaHistoryStore;
pub use types::{
    BreachType, HistoricalMetrics, PeriodType, QueueSnapshot, Severity, SlaBreachEvent,
    SlaEvaluation, SlaReport, SlaStatus,
};
