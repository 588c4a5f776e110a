//! Event payloads for the two bus tiers
//!
//! Internal events flow from the managers to the orchestrator only; public
//! events are what the presentation layer sees, already enriched.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::domain::site::Site;
use crate::domain::status::{MonitoringSummary, StatusUpdate};
use crate::events::bus::BusEvent;

/// Which part of the cache an invalidation covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export)]
pub enum CacheScope {
    All,
    #[serde(rename_all = "camelCase")]
    Site { identifier: String },
}

/// What a monitoring start/stop applied to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "scope", rename_all = "lowercase")]
#[ts(export)]
pub enum MonitoringScope {
    All,
    #[serde(rename_all = "camelCase")]
    Site { site_identifier: String },
    #[serde(rename_all = "camelCase")]
    Monitor {
        site_identifier: String,
        monitor_id: String,
    },
}

/// Adds/updates/removes included with a full sync snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct SyncDelta {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

// ============================================================================
// Internal tier (managers -> orchestrator)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum InternalEvent {
    SiteAdded {
        site: Site,
    },
    SiteUpdated {
        site: Site,
    },
    SiteRemoved {
        identifier: String,
        cascade: bool,
    },
    MonitorAdded {
        site_identifier: String,
        monitor_id: String,
    },
    MonitorRemoved {
        site_identifier: String,
        monitor_id: String,
    },
    MonitorStatusChanged {
        update: StatusUpdate,
    },
    MonitorCheckCompleted {
        update: StatusUpdate,
    },
    MonitorCheckCancelled {
        site_identifier: String,
        monitor_id: String,
        operation_id: String,
    },
    MonitoringStarted {
        scope: MonitoringScope,
        summary: MonitoringSummary,
    },
    MonitoringStopped {
        scope: MonitoringScope,
        summary: MonitoringSummary,
    },
    CacheInvalidated {
        scope: CacheScope,
    },
    HistoryLimitUpdated {
        new_value: u64,
        previous_value: u64,
    },
}

impl BusEvent for InternalEvent {
    fn event_name(&self) -> &'static str {
        match self {
            InternalEvent::SiteAdded { .. } => "internal:site:added",
            InternalEvent::SiteUpdated { .. } => "internal:site:updated",
            InternalEvent::SiteRemoved { .. } => "internal:site:removed",
            InternalEvent::MonitorAdded { .. } => "internal:monitor:added",
            InternalEvent::MonitorRemoved { .. } => "internal:monitor:removed",
            InternalEvent::MonitorStatusChanged { .. } => "internal:monitor:status-changed",
            InternalEvent::MonitorCheckCompleted { .. } => "internal:monitor:check-completed",
            InternalEvent::MonitorCheckCancelled { .. } => "internal:monitor:check-cancelled",
            InternalEvent::MonitoringStarted { .. } => "internal:monitoring:started",
            InternalEvent::MonitoringStopped { .. } => "internal:monitoring:stopped",
            InternalEvent::CacheInvalidated { .. } => "internal:cache:invalidated",
            InternalEvent::HistoryLimitUpdated { .. } => "internal:settings:history-limit-updated",
        }
    }
}

// ============================================================================
// Public tier (orchestrator -> presentation)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum PublicEvent {
    SiteAdded {
        site: Site,
    },
    SiteUpdated {
        site: Site,
    },
    SiteRemoved {
        identifier: String,
        cascade: bool,
    },
    MonitorStatusChanged {
        update: StatusUpdate,
    },
    MonitorCheckCompleted {
        update: StatusUpdate,
    },
    MonitoringStarted {
        scope: MonitoringScope,
        summary: MonitoringSummary,
    },
    MonitoringStopped {
        scope: MonitoringScope,
        summary: MonitoringSummary,
    },
    CacheInvalidated {
        scope: CacheScope,
    },
    StateSynchronized {
        sites: Vec<Site>,
        delta: Option<SyncDelta>,
    },
    HistoryLimitUpdated {
        new_value: u64,
        previous_value: u64,
    },
    UpdateStatus {
        status: String,
    },
}

impl BusEvent for PublicEvent {
    fn event_name(&self) -> &'static str {
        match self {
            PublicEvent::SiteAdded { .. } => "site:added",
            PublicEvent::SiteUpdated { .. } => "site:updated",
            PublicEvent::SiteRemoved { .. } => "site:removed",
            PublicEvent::MonitorStatusChanged { .. } => "monitor:status-changed",
            PublicEvent::MonitorCheckCompleted { .. } => "monitor:check-completed",
            PublicEvent::MonitoringStarted { .. } => "monitoring:started",
            PublicEvent::MonitoringStopped { .. } => "monitoring:stopped",
            PublicEvent::CacheInvalidated { .. } => "cache:invalidated",
            PublicEvent::StateSynchronized { .. } => "sites:state-synchronized",
            PublicEvent::HistoryLimitUpdated { .. } => "settings:history-limit-updated",
            PublicEvent::UpdateStatus { .. } => "update:status",
        }
    }
}
