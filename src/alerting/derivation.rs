//! Threshold rules that turn a machine health snapshot into notifications.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::MachineSnapshot;
use crate::notifications::models::{NotificationRecord, Severity};

/// Machines below this health score are reported even at low failure risk.
pub const HEALTH_SCORE_ALERT_BELOW: f64 = 85.0;
/// Failure probability above which a machine is at least a warning.
pub const WARNING_FAILURE_PROBABILITY: f64 = 0.3;
/// Failure probability above which a machine is critical.
pub const CRITICAL_FAILURE_PROBABILITY: f64 = 0.5;

/// Derives notifications for `machines`, stamping every record with `created_at`.
///
/// Output follows input order; rows repeating an earlier machine id are
/// ignored. The function is pure: identical input and timestamp give
/// identical output.
pub fn derive_notifications(
    machines: &[MachineSnapshot],
    created_at: DateTime<Utc>,
) -> Vec<NotificationRecord> {
    let mut seen = HashSet::new();
    machines
        .iter()
        .filter(|machine| seen.insert(machine.machine_id.as_str()))
        .filter_map(|machine| evaluate_machine(machine, created_at))
        .collect()
}

/// Same as [`derive_notifications`] with the timestamp captured once, now.
pub fn derive_notifications_now(machines: &[MachineSnapshot]) -> Vec<NotificationRecord> {
    derive_notifications(machines, Utc::now())
}

pub fn classify(machine: &MachineSnapshot) -> Option<Severity> {
    let needs_attention = machine.health_score < HEALTH_SCORE_ALERT_BELOW
        || machine.failure_probability > WARNING_FAILURE_PROBABILITY;
    if !needs_attention {
        return None;
    }

    let severity = if machine.failure_probability > CRITICAL_FAILURE_PROBABILITY {
        Severity::Critical
    } else if machine.failure_probability > WARNING_FAILURE_PROBABILITY {
        Severity::Warning
    } else {
        Severity::Info
    };
    Some(severity)
}

fn evaluate_machine(
    machine: &MachineSnapshot,
    created_at: DateTime<Utc>,
) -> Option<NotificationRecord> {
    let severity = classify(machine)?;
    let id = &machine.machine_id;
    let risk_percent = machine.failure_probability * 100.0;

    let (title, message) = match severity {
        Severity::Critical => (
            format!("🚨 Critical: {id}"),
            format!("High failure risk ({risk_percent:.1}%). Immediate maintenance required!"),
        ),
        Severity::Warning => (
            format!("⚠️ Warning: {id}"),
            format!("Elevated failure risk ({risk_percent:.1}%). Schedule maintenance soon."),
        ),
        Severity::Info => (
            format!("ℹ️ Info: {id}"),
            format!("Health score {:.1}. Monitor closely.", machine.health_score),
        ),
    };

    Some(NotificationRecord {
        id: id.clone(),
        machine_id: id.clone(),
        severity,
        title,
        message,
        created_at,
    })
}
