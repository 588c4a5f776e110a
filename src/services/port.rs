//! TCP port connectivity probe

use std::time::Instant;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct PortService;

impl PortService {
    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::Port { host, port } = &monitor.probe else {
            return Ok(mismatched_probe("port", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();
        let target = (host.as_str(), *port);

        match guard(token, limit, TcpStream::connect(target)).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Ok(stream)) => {
                // Dropping the stream closes the socket
                drop(stream);
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(CheckOutcome::up(
                    elapsed,
                    format!("TCP connect to {host}:{port} in {elapsed} ms"),
                ))
            }
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let code = match e.kind() {
                    std::io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
                    std::io::ErrorKind::TimedOut => "ETIMEDOUT",
                    std::io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
                    _ => "",
                };
                let details = if code.is_empty() {
                    format!("connect failed: {e}")
                } else {
                    format!("connect failed ({code})")
                };
                Ok(CheckOutcome::down(elapsed, details))
            }
        }
    }
}

impl MonitorService for PortService {
    fn name(&self) -> &'static str {
        "port"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::HistoryStatus;
    use crate::domain::monitor::MonitorStatus;
    use tokio::net::TcpListener;

    fn port_monitor(host: &str, port: u16) -> Monitor {
        Monitor {
            id: "m1".into(),
            monitoring: true,
            status: MonitorStatus::Pending,
            check_interval: 60_000,
            timeout: 2_000,
            retry_attempts: 0,
            response_time: None,
            last_checked: None,
            active_operations: vec![],
            probe: ProbeConfig::Port {
                host: host.into(),
                port,
            },
        }
    }

    #[tokio::test]
    async fn test_open_port_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let monitor = port_monitor("127.0.0.1", port);
        let token = CancellationToken::new();
        let outcome = PortService.check(&monitor, &token).await.unwrap();

        assert_eq!(outcome.status, HistoryStatus::Up);
        assert!(outcome.details.contains("TCP connect"));
    }

    #[tokio::test]
    async fn test_closed_port_is_down_with_code() {
        // Bind-then-drop guarantees the port is closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let monitor = port_monitor("127.0.0.1", port);
        let token = CancellationToken::new();
        let outcome = PortService.check(&monitor, &token).await.unwrap();

        assert_eq!(outcome.status, HistoryStatus::Down);
        assert!(outcome.details.contains("ECONNREFUSED"), "{}", outcome.details);
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let monitor = port_monitor("127.0.0.1", 9);
        let token = CancellationToken::new();
        token.cancel();
        let result = PortService.check(&monitor, &token).await;
        assert!(matches!(result, Err(crate::WatcherError::Aborted)));
    }
}
