//! Shared HTTP client with a per-host concurrency cap
//!
//! All HTTP-family monitors (plus heartbeat, replication and CDN checks)
//! go through one client so connection pooling is shared and no single
//! host is hammered by a burst of simultaneous probes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::utils::error::{Result, WatcherError};

pub struct HttpClient {
    client: reqwest::Client,
    permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_per_host: usize,
}

impl HttpClient {
    pub fn new(max_per_host: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptime-watcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WatcherError::Configuration(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            permits: Mutex::new(HashMap::new()),
            max_per_host: max_per_host.max(1),
        })
    }

    /// Borrow the underlying client for request building
    #[must_use]
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Wait for a request slot for the given URL's host.
    /// The permit releases the slot when dropped.
    pub async fn acquire(&self, url: &str) -> OwnedSemaphorePermit {
        let host = host_of(url);
        let semaphore = {
            let mut permits = self.permits.lock();
            permits
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
                .clone()
        };
        // The semaphore is never closed
        semaphore
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed")
    }

    #[must_use]
    pub fn max_per_host(&self) -> usize {
        self.max_per_host
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_per_host", &self.max_per_host)
            .finish_non_exhaustive()
    }
}

/// Host key used for rate limiting; unparseable URLs share one bucket
#[must_use]
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
        .unwrap_or_else(|| "<invalid>".to_string())
}

/// Translate a transport error into a short detail string, preferring the
/// system error code when one is buried in the source chain
#[must_use]
pub fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "timeout".to_string();
    }
    if let Some(code) = io_code_of(error) {
        return format!("{code}: {error}");
    }
    if error.is_connect() {
        return format!("connect failed: {error}");
    }
    error.to_string()
}

fn io_code_of(error: &(dyn std::error::Error + 'static)) -> Option<&'static str> {
    let mut source = error.source();
    while let Some(current) = source {
        if let Some(io_error) = current.downcast_ref::<std::io::Error>() {
            return match io_error.kind() {
                std::io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                std::io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
                std::io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
                std::io::ErrorKind::HostUnreachable => Some("EHOSTUNREACH"),
                std::io::ErrorKind::NetworkUnreachable => Some("ENETUNREACH"),
                _ => None,
            };
        }
        source = current.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://example.com/path"), "example.com");
        assert_eq!(host_of("http://example.com:8080/x"), "example.com");
        assert_eq!(host_of("not a url"), "<invalid>");
    }

    #[tokio::test]
    async fn test_per_host_slots_are_bounded() {
        let client = HttpClient::new(2).unwrap();

        let first = client.acquire("https://example.com/a").await;
        let _second = client.acquire("https://example.com/b").await;

        // Third acquire for the same host must wait until a permit drops
        let third = tokio::time::timeout(
            Duration::from_millis(50),
            client.acquire("https://example.com/c"),
        )
        .await;
        assert!(third.is_err(), "third slot should be blocked");

        // A different host has its own bucket
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            client.acquire("https://other.example/a"),
        )
        .await;
        assert!(other.is_ok());

        drop(first);
        let third = tokio::time::timeout(
            Duration::from_millis(200),
            client.acquire("https://example.com/c"),
        )
        .await;
        assert!(third.is_ok(), "slot should free after drop");
    }
}
