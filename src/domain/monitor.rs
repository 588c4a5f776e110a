use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};
use ts_rs::TS;

use crate::config::{
    BASELINE_TIMEOUT_MS, CLEANUP_BUFFER_MS, DEFAULT_TIMEOUT_MS, MAX_RETRY_ATTEMPTS,
    MIN_CHECK_INTERVAL_MS,
};
use crate::utils::error::{Result, WatcherError};

// ============================================================================
// Monitor kind tags
// ============================================================================

/// Closed set of probe kinds; the serialized form is the wire/database tag
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    TS,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[ts(export)]
pub enum MonitorType {
    Http,
    HttpStatus,
    HttpKeyword,
    HttpHeader,
    HttpJson,
    HttpLatency,
    Port,
    Ping,
    Dns,
    Ssl,
    WebsocketKeepalive,
    ServerHeartbeat,
    Replication,
    CdnEdgeConsistency,
}

impl MonitorType {
    /// Human-readable label for settings forms and summaries
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MonitorType::Http => "HTTP (Website URL)",
            MonitorType::HttpStatus => "HTTP Status Code",
            MonitorType::HttpKeyword => "HTTP Keyword Match",
            MonitorType::HttpHeader => "HTTP Header Match",
            MonitorType::HttpJson => "HTTP JSON Value",
            MonitorType::HttpLatency => "HTTP Response Latency",
            MonitorType::Port => "TCP Port",
            MonitorType::Ping => "Ping (ICMP)",
            MonitorType::Dns => "DNS Record",
            MonitorType::Ssl => "SSL Certificate",
            MonitorType::WebsocketKeepalive => "WebSocket Keepalive",
            MonitorType::ServerHeartbeat => "Server Heartbeat",
            MonitorType::Replication => "Replication Lag",
            MonitorType::CdnEdgeConsistency => "CDN Edge Consistency",
        }
    }
}

/// Monitor state as surfaced to the presentation layer
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    TS,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export)]
pub enum MonitorStatus {
    Up,
    Down,
    Degraded,
    Pending,
    Paused,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::Pending
    }
}

// ============================================================================
// Probe payloads
// ============================================================================

/// Type-discriminated probe configuration
///
/// The tag doubles as the monitor type; adding a variant here forces the
/// dispatch in the service registry to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum ProbeConfig {
    #[serde(rename_all = "camelCase")]
    Http { url: String },
    #[serde(rename_all = "camelCase")]
    HttpStatus {
        url: String,
        expected_status_code: u16,
    },
    #[serde(rename_all = "camelCase")]
    HttpKeyword { url: String, body_keyword: String },
    #[serde(rename_all = "camelCase")]
    HttpHeader {
        url: String,
        header_name: String,
        expected_header_value: String,
    },
    #[serde(rename_all = "camelCase")]
    HttpJson {
        url: String,
        json_path: String,
        expected_json_value: String,
    },
    #[serde(rename_all = "camelCase")]
    HttpLatency { url: String, max_response_time: u64 },
    #[serde(rename_all = "camelCase")]
    Port { host: String, port: u16 },
    #[serde(rename_all = "camelCase")]
    Ping { host: String },
    #[serde(rename_all = "camelCase")]
    Dns {
        host: String,
        record_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Ssl {
        host: String,
        port: u16,
        certificate_warning_days: u32,
    },
    #[serde(rename_all = "camelCase")]
    WebsocketKeepalive { url: String },
    #[serde(rename_all = "camelCase")]
    ServerHeartbeat {
        url: String,
        expected_status: String,
        max_drift_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    Replication {
        primary_status_url: String,
        replica_status_url: String,
        max_replication_lag_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    CdnEdgeConsistency {
        baseline_url: String,
        edge_locations: Vec<String>,
    },
}

impl ProbeConfig {
    #[must_use]
    pub fn monitor_type(&self) -> MonitorType {
        match self {
            ProbeConfig::Http { .. } => MonitorType::Http,
            ProbeConfig::HttpStatus { .. } => MonitorType::HttpStatus,
            ProbeConfig::HttpKeyword { .. } => MonitorType::HttpKeyword,
            ProbeConfig::HttpHeader { .. } => MonitorType::HttpHeader,
            ProbeConfig::HttpJson { .. } => MonitorType::HttpJson,
            ProbeConfig::HttpLatency { .. } => MonitorType::HttpLatency,
            ProbeConfig::Port { .. } => MonitorType::Port,
            ProbeConfig::Ping { .. } => MonitorType::Ping,
            ProbeConfig::Dns { .. } => MonitorType::Dns,
            ProbeConfig::Ssl { .. } => MonitorType::Ssl,
            ProbeConfig::WebsocketKeepalive { .. } => MonitorType::WebsocketKeepalive,
            ProbeConfig::ServerHeartbeat { .. } => MonitorType::ServerHeartbeat,
            ProbeConfig::Replication { .. } => MonitorType::Replication,
            ProbeConfig::CdnEdgeConsistency { .. } => MonitorType::CdnEdgeConsistency,
        }
    }

    /// Validate the type-specific fields
    pub fn validate(&self) -> Result<()> {
        match self {
            ProbeConfig::Http { url }
            | ProbeConfig::HttpLatency { url, .. }
            | ProbeConfig::HttpStatus { url, .. } => validate_url(url, &["http", "https"]),
            ProbeConfig::HttpKeyword { url, body_keyword } => {
                validate_url(url, &["http", "https"])?;
                require_non_empty("bodyKeyword", body_keyword)
            }
            ProbeConfig::HttpHeader {
                url, header_name, ..
            } => {
                validate_url(url, &["http", "https"])?;
                require_non_empty("headerName", header_name)
            }
            ProbeConfig::HttpJson { url, json_path, .. } => {
                validate_url(url, &["http", "https"])?;
                require_non_empty("jsonPath", json_path)
            }
            ProbeConfig::Port { host, port } | ProbeConfig::Ssl { host, port, .. } => {
                require_non_empty("host", host)?;
                if *port == 0 {
                    return Err(WatcherError::field_validation(
                        "port",
                        "port must be 1-65535",
                    ));
                }
                Ok(())
            }
            ProbeConfig::Ping { host } => require_non_empty("host", host),
            ProbeConfig::Dns {
                host, record_type, ..
            } => {
                require_non_empty("host", host)?;
                if !is_known_record_type(record_type) {
                    return Err(WatcherError::field_validation(
                        "recordType",
                        format!("unsupported DNS record type: {record_type}"),
                    ));
                }
                Ok(())
            }
            ProbeConfig::WebsocketKeepalive { url } => validate_url(url, &["ws", "wss"]),
            ProbeConfig::ServerHeartbeat {
                url,
                expected_status,
                ..
            } => {
                validate_url(url, &["http", "https"])?;
                require_non_empty("expectedStatus", expected_status)
            }
            ProbeConfig::Replication {
                primary_status_url,
                replica_status_url,
                ..
            } => {
                validate_url(primary_status_url, &["http", "https"])?;
                validate_url(replica_status_url, &["http", "https"])
            }
            ProbeConfig::CdnEdgeConsistency {
                baseline_url,
                edge_locations,
            } => {
                validate_url(baseline_url, &["http", "https"])?;
                if edge_locations.is_empty() {
                    return Err(WatcherError::field_validation(
                        "edgeLocations",
                        "at least one edge URL is required",
                    ));
                }
                for edge in edge_locations {
                    validate_url(edge, &["http", "https"])?;
                }
                Ok(())
            }
        }
    }
}

/// DNS record types the resolver understands
pub const DNS_RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "CNAME", "MX", "TXT", "NS", "SRV", "CAA", "PTR", "NAPTR", "SOA", "TLSA", "ANY",
];

fn is_known_record_type(record_type: &str) -> bool {
    DNS_RECORD_TYPES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(record_type))
}

fn validate_url(url: &str, schemes: &[&str]) -> Result<()> {
    require_non_empty("url", url)?;
    let has_scheme = schemes
        .iter()
        .any(|scheme| url.starts_with(&format!("{scheme}://")));
    if !has_scheme {
        return Err(WatcherError::field_validation(
            "url",
            format!("url must start with one of: {}://", schemes.join("://, ")),
        ));
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WatcherError::field_validation(field, "must not be empty"));
    }
    Ok(())
}

// ============================================================================
// Monitor
// ============================================================================

/// A single probe instance belonging to a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct Monitor {
    /// Assigned on insert; empty on a not-yet-persisted monitor
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_true")]
    pub monitoring: bool,
    #[serde(default)]
    pub status: MonitorStatus,
    /// Milliseconds between scheduled checks
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Milliseconds before a single probe attempt is abandoned
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub response_time: Option<u64>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// Operation ids currently in flight for this monitor
    #[serde(default)]
    pub active_operations: Vec<String>,
    pub probe: ProbeConfig,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    60_000
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Monitor {
    #[must_use]
    pub fn monitor_type(&self) -> MonitorType {
        self.probe.monitor_type()
    }

    /// Validate scheduling fields and the probe payload
    pub fn validate(&self) -> Result<()> {
        if self.check_interval < MIN_CHECK_INTERVAL_MS {
            return Err(WatcherError::field_validation(
                "checkInterval",
                format!("must be at least {MIN_CHECK_INTERVAL_MS} ms"),
            ));
        }
        if self.timeout == 0 {
            return Err(WatcherError::field_validation(
                "timeout",
                "must be positive",
            ));
        }
        if self.timeout + CLEANUP_BUFFER_MS > self.check_interval {
            return Err(WatcherError::field_validation(
                "timeout",
                format!(
                    "must leave a {CLEANUP_BUFFER_MS} ms cleanup buffer inside the check interval"
                ),
            ));
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(WatcherError::field_validation(
                "retryAttempts",
                format!("must be at most {MAX_RETRY_ATTEMPTS}"),
            ));
        }
        self.probe.validate()
    }

    /// Timeout actually applied to a probe attempt
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.min(BASELINE_TIMEOUT_MS))
    }

    /// Hard deadline for the whole operation, including cleanup
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.effective_timeout() + Duration::from_millis(CLEANUP_BUFFER_MS)
    }
}
