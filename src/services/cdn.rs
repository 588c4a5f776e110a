//! CDN edge consistency probe
//!
//! Hashes the origin body and every edge body; any divergence marks the
//! monitor degraded, a failing origin marks it down.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::http_client::{HttpClient, describe_transport_error};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct CdnService {
    client: Arc<HttpClient>,
}

impl CdnService {
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    async fn fetch_hash(&self, url: &str) -> Result<String, String> {
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
        let body = response
            .bytes()
            .await
            .map_err(|e| describe_transport_error(&e))?;
        Ok(format!("{:x}", Sha256::digest(&body)))
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::CdnEdgeConsistency {
            baseline_url,
            edge_locations,
        } = &monitor.probe
        else {
            return Ok(mismatched_probe("cdn-edge-consistency", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        let attempt = async {
            let baseline = self.fetch_hash(baseline_url).await?;
            let edge_futures = edge_locations.iter().map(|edge| self.fetch_hash(edge));
            let edges = futures::future::join_all(edge_futures).await;
            Ok::<(String, Vec<Result<String, String>>), String>((baseline, edges))
        };

        match guard(token, limit, attempt).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(CheckOutcome::down(elapsed, format!("baseline: {e}")))
            }
            Guarded::Done(Ok((baseline, edges))) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(evaluate_consistency(&baseline, &edges, elapsed))
            }
        }
    }
}

impl MonitorService for CdnService {
    fn name(&self) -> &'static str {
        "cdn-edge-consistency"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

/// Compare edge hashes against the baseline hash
#[must_use]
pub fn evaluate_consistency(
    baseline: &str,
    edges: &[Result<String, String>],
    elapsed_ms: u64,
) -> CheckOutcome {
    let total = edges.len();
    let mismatched = edges
        .iter()
        .filter(|edge| !matches!(edge, Ok(hash) if hash == baseline))
        .count();

    if mismatched == 0 {
        CheckOutcome::up(
            elapsed_ms,
            format!("{total} edge(s) consistent in {elapsed_ms} ms"),
        )
    } else {
        CheckOutcome::degraded(
            elapsed_ms,
            format!("{mismatched}/{total} edge(s) diverge from origin"),
        )
    }
}
