//! ICMP reachability via the system ping binary
//!
//! The platform ping utilities only accept whole-second reply timeouts, so
//! the effective timeout is rounded up; the async timeout still enforces
//! the exact deadline.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct PingService;

/// Arguments for one echo request with the timeout rounded up to seconds
#[must_use]
pub fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    let timeout_s = timeout.as_millis().div_ceil(1000).max(1);
    #[cfg(target_os = "windows")]
    {
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            (timeout_s * 1000).to_string(),
            host.into(),
        ]
    }
    #[cfg(not(target_os = "windows"))]
    {
        vec![
            "-c".into(),
            "1".into(),
            "-W".into(),
            timeout_s.to_string(),
            host.into(),
        ]
    }
}

/// Extract the reported round-trip time from ping output
#[must_use]
pub fn parse_ping_time(stdout: &str) -> Option<f64> {
    let marker = stdout.find("time=")?;
    let rest = &stdout[marker + 5..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

impl PingService {
    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::Ping { host } = &monitor.probe else {
            return Ok(mismatched_probe("ping", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        let attempt = Command::new("ping")
            .args(ping_args(host, limit))
            .kill_on_drop(true)
            .output();

        match guard(token, limit, attempt).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(CheckOutcome::down(elapsed, format!("ping unavailable: {e}")))
            }
            Guarded::Done(Ok(output)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let reported = parse_ping_time(&stdout)
                        .map_or(elapsed, |ms| ms.round() as u64);
                    Ok(CheckOutcome::up(
                        reported,
                        format!("ping reply in {reported} ms"),
                    ))
                } else {
                    Ok(CheckOutcome::down(elapsed, "no ping reply"))
                }
            }
        }
    }
}

impl MonitorService for PingService {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}
