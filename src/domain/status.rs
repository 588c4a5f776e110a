use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::domain::monitor::MonitorStatus;
use crate::domain::site::Site;

/// Enriched check result carried by public events and the manual-check
/// fast path, so the renderer can apply it optimistically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Full snapshot of the owning site after the check was persisted
    pub site: Site,
    pub monitor_id: String,
    pub previous_status: MonitorStatus,
    pub status: MonitorStatus,
    pub response_time: Option<u64>,
    pub details: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub correlation_id: String,
}

impl StatusUpdate {
    /// Whether the check moved the monitor to a different status
    #[must_use]
    pub fn is_transition(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Per-monitor failure inside a batch lifecycle operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct MonitorOperationFailure {
    pub monitor_id: String,
    pub reason: String,
}

/// Result of a start/stop operation over one or more monitors.
/// Partial failures are reported here, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct MonitoringSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<MonitorOperationFailure>,
}

impl MonitoringSummary {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, monitor_id: impl Into<String>, reason: impl Into<String>) {
        self.attempted += 1;
        self.failed.push(MonitorOperationFailure {
            monitor_id: monitor_id.into(),
            reason: reason.into(),
        });
    }

    pub fn merge(&mut self, other: MonitoringSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}
