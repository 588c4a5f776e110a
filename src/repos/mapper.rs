//! Row normalization helpers shared by the repositories

use std::str::FromStr;

use crate::domain::monitor::{MonitorStatus, ProbeConfig};

/// Clamp an integer column into `[min, max]`, substituting `fallback`
/// for out-of-range values
#[must_use]
pub fn safe_integer(value: i64, min: i64, max: i64, fallback: i64) -> i64 {
    if value < min || value > max {
        fallback
    } else {
        value
    }
}

/// Coerce a possibly-negative column into a `u64`, substituting `fallback`
#[must_use]
pub fn safe_u64(value: i64, fallback: u64) -> u64 {
    u64::try_from(value).unwrap_or(fallback)
}

/// Parse the JSON-encoded `active_operations` column defensively
#[must_use]
pub fn parse_active_operations(raw: &str, monitor_id: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(ops) => ops,
        Err(e) => {
            tracing::warn!(
                "Corrupt active_operations column for monitor {monitor_id}: {e}. \
                Substituting an empty set."
            );
            Vec::new()
        }
    }
}

/// Parse the JSON-encoded probe payload; `None` marks an unusable row
#[must_use]
pub fn parse_probe(raw: &str, monitor_id: &str) -> Option<ProbeConfig> {
    match serde_json::from_str::<ProbeConfig>(raw) {
        Ok(probe) => Some(probe),
        Err(e) => {
            tracing::warn!("Corrupt probe column for monitor {monitor_id}: {e}. Skipping row.");
            None
        }
    }
}

/// Parse a stored status tag, falling back to `pending` with a warning
#[must_use]
pub fn parse_status(raw: &str, monitor_id: &str) -> MonitorStatus {
    MonitorStatus::from_str(raw).unwrap_or_else(|_| {
        tracing::warn!("Unknown status '{raw}' for monitor {monitor_id}; coercing to pending");
        MonitorStatus::Pending
    })
}
