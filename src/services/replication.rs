//! Replication lag probe
//!
//! Fetches the primary and replica status documents and compares their
//! reported timestamps.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::http_client::{HttpClient, describe_transport_error};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct ReplicationService {
    client: Arc<HttpClient>,
}

impl ReplicationService {
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    async fn fetch_timestamp(&self, url: &str) -> Result<i64, String> {
        let _permit = self.client.acquire(url).await;
        let response = self
            .client
            .inner()
            .get(url)
            .send()
            .await
            .map_err(|e| describe_transport_error(&e))?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }
        let document = response
            .json::<serde_json::Value>()
            .await
            .map_err(|_| "body is not JSON".to_string())?;
        document
            .get("timestamp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| "missing timestamp field".to_string())
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::Replication {
            primary_status_url,
            replica_status_url,
            max_replication_lag_seconds,
        } = &monitor.probe
        else {
            return Ok(mismatched_probe("replication", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        let attempt = async {
            tokio::join!(
                self.fetch_timestamp(primary_status_url),
                self.fetch_timestamp(replica_status_url),
            )
        };

        match guard(token, limit, attempt).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done((primary, replica)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(match (primary, replica) {
                    (Err(e), _) => CheckOutcome::down(elapsed, format!("primary: {e}")),
                    (_, Err(e)) => CheckOutcome::down(elapsed, format!("replica: {e}")),
                    (Ok(primary_ms), Ok(replica_ms)) => evaluate_lag(
                        primary_ms,
                        replica_ms,
                        *max_replication_lag_seconds,
                        elapsed,
                    ),
                })
            }
        }
    }
}

impl MonitorService for ReplicationService {
    fn name(&self) -> &'static str {
        "replication"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

/// Compare primary and replica timestamps against the lag threshold.
/// A replica ahead of the primary counts as zero lag.
#[must_use]
pub fn evaluate_lag(
    primary_ms: i64,
    replica_ms: i64,
    max_lag_seconds: u64,
    elapsed_ms: u64,
) -> CheckOutcome {
    let lag_seconds = ((primary_ms - replica_ms).max(0)) / 1000;
    if lag_seconds > max_lag_seconds as i64 {
        CheckOutcome::degraded(
            elapsed_ms,
            format!("replication lag {lag_seconds} s exceeds {max_lag_seconds} s"),
        )
    } else {
        CheckOutcome::up(elapsed_ms, format!("replication lag {lag_seconds} s"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::HistoryStatus;

    #[test]
    fn test_lag_within_threshold_is_up() {
        let outcome = evaluate_lag(10_000, 8_000, 5, 3);
        assert_eq!(outcome.status, HistoryStatus::Up);
        assert!(outcome.details.contains("lag 2 s"));
    }

    #[test]
    fn test_excess_lag_is_degraded() {
        let outcome = evaluate_lag(60_000, 0, 30, 3);
        assert_eq!(outcome.status, HistoryStatus::Degraded);
        assert!(outcome.details.contains("60 s"));
    }

    #[test]
    fn test_replica_ahead_counts_as_zero_lag() {
        let outcome = evaluate_lag(1_000, 5_000, 1, 3);
        assert_eq!(outcome.status, HistoryStatus::Up);
        assert!(outcome.details.contains("lag 0 s"));
    }
}
