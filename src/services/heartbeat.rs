//! Server heartbeat probe
//!
//! Fetches a JSON heartbeat document and asserts both the reported status
//! value and how far the reported timestamp drifts from our clock.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::http_client::{HttpClient, describe_transport_error};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct HeartbeatService {
    client: Arc<HttpClient>,
}

impl HeartbeatService {
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::ServerHeartbeat {
            url,
            expected_status,
            max_drift_seconds,
        } = &monitor.probe
        else {
            return Ok(mismatched_probe("server-heartbeat", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        let attempt = async {
            let _permit = self.client.acquire(url).await;
            let response = self.client.inner().get(url).send().await?;
            let status = response.status().as_u16();
            let body = response.json::<serde_json::Value>().await;
            Ok::<(u16, std::result::Result<serde_json::Value, reqwest::Error>), reqwest::Error>((
                status, body,
            ))
        };

        match guard(token, limit, attempt).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(CheckOutcome::down(elapsed, describe_transport_error(&e)))
            }
            Guarded::Done(Ok((status, body))) => {
                let elapsed = started.elapsed().as_millis() as u64;
                if !(200..=299).contains(&status) {
                    return Ok(CheckOutcome::down(
                        elapsed,
                        format!("heartbeat returned HTTP {status}"),
                    ));
                }
                match body {
                    Err(_) => Ok(CheckOutcome::down(elapsed, "heartbeat body is not JSON")),
                    Ok(document) => Ok(evaluate_heartbeat(
                        &document,
                        expected_status,
                        *max_drift_seconds,
                        chrono::Utc::now().timestamp_millis(),
                        elapsed,
                    )),
                }
            }
        }
    }
}

impl MonitorService for HeartbeatService {
    fn name(&self) -> &'static str {
        "server-heartbeat"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

/// Assert a heartbeat document of the shape `{ "status": .., "timestamp": .. }`
#[must_use]
pub fn evaluate_heartbeat(
    document: &serde_json::Value,
    expected_status: &str,
    max_drift_seconds: u64,
    now_ms: i64,
    elapsed_ms: u64,
) -> CheckOutcome {
    let Some(status) = document.get("status").and_then(serde_json::Value::as_str) else {
        return CheckOutcome::down(elapsed_ms, "heartbeat is missing a status field");
    };
    if !status.eq_ignore_ascii_case(expected_status) {
        return CheckOutcome::down(elapsed_ms, format!("heartbeat status is '{status}'"));
    }

    let Some(timestamp_ms) = document.get("timestamp").and_then(serde_json::Value::as_i64) else {
        return CheckOutcome::down(elapsed_ms, "heartbeat is missing a timestamp field");
    };

    let drift_seconds = (now_ms - timestamp_ms).abs() / 1000;
    if drift_seconds > max_drift_seconds as i64 {
        CheckOutcome::degraded(
            elapsed_ms,
            format!("heartbeat drift {drift_seconds} s exceeds {max_drift_seconds} s"),
        )
    } else {
        CheckOutcome::up(
            elapsed_ms,
            format!("heartbeat ok, drift {drift_seconds} s"),
        )
    }
}
