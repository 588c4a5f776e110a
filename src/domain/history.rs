use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use ts_rs::TS;

use crate::config::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use crate::domain::monitor::MonitorStatus;

/// Outcome recorded for a completed check; never `pending` or `paused`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, EnumString, TS,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export)]
pub enum HistoryStatus {
    Up,
    Down,
    Degraded,
}

impl From<HistoryStatus> for MonitorStatus {
    fn from(status: HistoryStatus) -> Self {
        match status {
            HistoryStatus::Up => MonitorStatus::Up,
            HistoryStatus::Down => MonitorStatus::Down,
            HistoryStatus::Degraded => MonitorStatus::Degraded,
        }
    }
}

/// Append-only status record bound to a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct HistoryEntry {
    pub monitor_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub status: HistoryStatus,
    /// Non-negative response time in milliseconds
    pub response_time: u64,
    /// Short protocol-specific summary, e.g. "HTTP 200 in 142 ms"
    pub details: String,
}

/// Normalize a user-supplied history limit
///
/// Fractions floor, values above the ceiling clamp, negative or non-finite
/// input falls back to the default. Zero keeps its "unlimited" meaning.
#[must_use]
pub fn normalize_history_limit(raw: f64) -> u64 {
    if !raw.is_finite() || raw < 0.0 {
        return DEFAULT_HISTORY_LIMIT;
    }
    let floored = raw.floor() as u64;
    floored.min(MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_status_maps_into_monitor_status() {
        assert_eq!(MonitorStatus::from(HistoryStatus::Up), MonitorStatus::Up);
        assert_eq!(
            MonitorStatus::from(HistoryStatus::Degraded),
            MonitorStatus::Degraded
        );
    }

    #[test]
    fn test_normalize_history_limit() {
        assert_eq!(normalize_history_limit(25.0), 25);
        assert_eq!(normalize_history_limit(25.9), 25);
        assert_eq!(normalize_history_limit(0.0), 0);
        assert_eq!(normalize_history_limit(-3.0), DEFAULT_HISTORY_LIMIT);
        assert_eq!(normalize_history_limit(f64::NAN), DEFAULT_HISTORY_LIMIT);
        assert_eq!(normalize_history_limit(f64::INFINITY), DEFAULT_HISTORY_LIMIT);
        assert_eq!(
            normalize_history_limit((MAX_HISTORY_LIMIT as f64) * 10.0),
            MAX_HISTORY_LIMIT
        );
    }

    #[test]
    fn test_history_entry_serde_shape() {
        let entry = HistoryEntry {
            monitor_id: "m1".into(),
            timestamp: 1_700_000_000_000,
            status: HistoryStatus::Up,
            response_time: 142,
            details: "HTTP 200 in 142 ms".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["monitorId"], "m1");
        assert_eq!(json["status"], "up");
        assert_eq!(json["responseTime"], 142);
    }
}
