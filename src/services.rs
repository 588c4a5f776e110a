//! Protocol-specific probe implementations
//!
//! Every service implements the same contract: race the underlying I/O
//! against the effective timeout and the caller's cancellation token, then
//! normalize the outcome into `up`, `degraded` or `down` with a short,
//! stable detail string. Cancellation is the only error that escapes.

pub mod cdn;
pub mod dns;
pub mod heartbeat;
pub mod http;
pub mod http_client;
pub mod ping;
pub mod port;
pub mod registry;
pub mod replication;
pub mod ssl;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::history::HistoryStatus;
use crate::domain::monitor::Monitor;
use crate::utils::error::{Result, WatcherError};

pub use http_client::HttpClient;
pub use registry::MonitorServiceRegistry;

/// Normalized result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: HistoryStatus,
    /// Elapsed milliseconds for the attempt
    pub response_time: u64,
    pub details: String,
}

impl CheckOutcome {
    #[must_use]
    pub fn up(response_time: u64, details: impl Into<String>) -> Self {
        Self {
            status: HistoryStatus::Up,
            response_time,
            details: details.into(),
        }
    }

    #[must_use]
    pub fn degraded(response_time: u64, details: impl Into<String>) -> Self {
        Self {
            status: HistoryStatus::Degraded,
            response_time,
            details: details.into(),
        }
    }

    #[must_use]
    pub fn down(response_time: u64, details: impl Into<String>) -> Self {
        Self {
            status: HistoryStatus::Down,
            response_time,
            details: details.into(),
        }
    }

    /// The normalized shape of a probe-level timeout
    #[must_use]
    pub fn timed_out(limit: Duration) -> Self {
        Self::down(limit.as_millis() as u64, "timeout")
    }
}

pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<CheckOutcome>> + Send + 'a>>;

/// Contract shared by every protocol probe
///
/// Implementations must not leak sockets or listeners on cancellation;
/// dropping the in-flight future is the cleanup path.
pub trait MonitorService: Send + Sync {
    /// Probe kind handled, for logging
    fn name(&self) -> &'static str;

    /// Perform one attempt, honoring the cancellation token
    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a>;
}

/// Result of racing a future against the timeout and cancellation
pub(crate) enum Guarded<T> {
    Done(T),
    TimedOut,
}

/// Race `fut` against `limit` and the cancellation token.
/// Cancellation wins ties and surfaces as `WatcherError::Aborted`.
pub(crate) async fn guard<T>(
    token: &CancellationToken,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<Guarded<T>> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(WatcherError::Aborted),
        outcome = tokio::time::timeout(limit, fut) => Ok(match outcome {
            Ok(value) => Guarded::Done(value),
            Err(_) => Guarded::TimedOut,
        }),
    }
}

/// Outcome for a service invoked with the wrong probe variant.
/// Reaching this is a dispatch bug, not a monitoring result.
pub(crate) fn mismatched_probe(service: &str, monitor: &Monitor) -> CheckOutcome {
    tracing::error!(
        "{service} service dispatched for monitor {} of type {}",
        monitor.id,
        monitor.monitor_type()
    );
    CheckOutcome::down(0, "internal dispatch error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_completes() {
        let token = CancellationToken::new();
        let result = guard(&token, Duration::from_secs(1), async { 42 })
            .await
            .unwrap();
        assert!(matches!(result, Guarded::Done(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_times_out() {
        let token = CancellationToken::new();
        let result = guard(&token, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await
        .unwrap();
        assert!(matches!(result, Guarded::TimedOut));
    }

    #[tokio::test]
    async fn test_guard_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = guard(&token, Duration::from_secs(1), async { 42 }).await;
        assert!(matches!(result, Err(WatcherError::Aborted)));
    }

    #[test]
    fn test_timed_out_shape() {
        let outcome = CheckOutcome::timed_out(Duration::from_millis(5_000));
        assert_eq!(outcome.status, HistoryStatus::Down);
        assert_eq!(outcome.response_time, 5_000);
        assert_eq!(outcome.details, "timeout");
    }
}
