//! Role to monitoring-mode permissions
//!
//! Each role may use a fixed set of modes; every role's set contains the
//! previous role's set.

use crate::types::{MonitoringMode, SupervisorRole};

pub const ROLE_PERMISSIONS: [(SupervisorRole, &[MonitoringMode]); 3] = [
    (
        SupervisorRole::Supervisor,
        &[MonitoringMode::Listen, MonitoringMode::Whisper],
    ),
    (
        SupervisorRole::Manager,
        &[
            MonitoringMode::Listen,
            MonitoringMode::Whisper,
            MonitoringMode::Barge,
        ],
    ),
    (
        SupervisorRole::Admin,
        &[
            MonitoringMode::Listen,
            MonitoringMode::Whisper,
            MonitoringMode::Barge,
            MonitoringMode::Coach,
        ],
    ),
];

/// Modes `role` may request
pub fn allowed_modes(role: SupervisorRole) -> &'static [MonitoringMode] {
    ROLE_PERMISSIONS
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, modes)| *modes)
        .unwrap_or(&[])
}

pub fn can_use(role: SupervisorRole, mode: MonitoringMode) -> bool {
    allowed_modes(role).contains(&mode)
}
