//! Presence status adjacency table
//!
//! Offline can only move to online. Every live status can move to any other
//! live status or to offline. Entering offline by timeout or disconnect is
//! allowed from every state and does not go through this table.

use crate::types::PresenceStatus::{self, Away, Busy, Dnd, Offline, Online};

/// `(from, allowed targets)` for every status
pub const STATUS_TRANSITIONS: [(PresenceStatus, &[PresenceStatus]); 5] = [
    (Offline, &[Online]),
    (Online, &[Busy, Away, Dnd, Offline]),
    (Busy, &[Online, Away, Dnd, Offline]),
    (Away, &[Online, Busy, Dnd, Offline]),
    (Dnd, &[Online, Busy, Away, Offline]),
];

/// Targets reachable from `from`
pub fn allowed_targets(from: PresenceStatus) -> &'static [PresenceStatus] {
    STATUS_TRANSITIONS
        .iter()
        .find(|(status, _)| *status == from)
        .map(|(_, targets)| *targets)
        .unwrap_or(&[])
}

/// Whether `from -> to` is a listed transition. Same-status pairs are not
/// listed; callers treat them as no-ops.
pub fn is_allowed(from: PresenceStatus, to: PresenceStatus) -> bool {
    allowed_targets(from).contains(&to)
}
