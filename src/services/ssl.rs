//! TLS certificate validity probe

use std::sync::Arc;
use std::time::Instant;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::domain::history::HistoryStatus;
use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

const SECONDS_PER_DAY: i64 = 86_400;

pub struct SslService {
    connector: TlsConnector,
}

impl SslService {
    #[must_use]
    pub fn new() -> Self {
        // Pin the process-level crypto provider; harmless if already set
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn handshake(&self, host: &str, port: u16) -> Result<i64, String> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| format!("invalid server name: {e}"))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| format!("handshake failed: {e}"))?;

        let (_, connection) = tls.get_ref();
        let certs = connection
            .peer_certificates()
            .ok_or_else(|| "no peer certificate presented".to_string())?;
        let leaf = certs
            .first()
            .ok_or_else(|| "empty certificate chain".to_string())?;
        let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| format!("certificate parse failed: {e}"))?;
        Ok(parsed.validity().not_after.timestamp())
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::Ssl {
            host,
            port,
            certificate_warning_days,
        } = &monitor.probe
        else {
            return Ok(mismatched_probe("ssl", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        match guard(token, limit, self.handshake(host, *port)).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(message)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                // An expired certificate already fails the handshake
                let details = if message.to_lowercase().contains("expired") {
                    "certificate expired".to_string()
                } else {
                    message
                };
                Ok(CheckOutcome::down(elapsed, details))
            }
            Guarded::Done(Ok(not_after)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let now = chrono::Utc::now().timestamp();
                Ok(classify_certificate(
                    not_after,
                    now,
                    *certificate_warning_days,
                    elapsed,
                ))
            }
        }
    }
}

impl Default for SslService {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorService for SslService {
    fn name(&self) -> &'static str {
        "ssl"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

/// Classify certificate freshness against the warning window
#[must_use]
pub fn classify_certificate(
    not_after_secs: i64,
    now_secs: i64,
    warning_days: u32,
    elapsed_ms: u64,
) -> CheckOutcome {
    let remaining_secs = not_after_secs - now_secs;
    if remaining_secs <= 0 {
        return CheckOutcome::down(elapsed_ms, "certificate expired");
    }

    let remaining_days = remaining_secs / SECONDS_PER_DAY;
    if remaining_secs < i64::from(warning_days) * SECONDS_PER_DAY {
        CheckOutcome::degraded(
            elapsed_ms,
            format!("certificate expires in {remaining_days} day(s)"),
        )
    } else {
        CheckOutcome {
            status: HistoryStatus::Up,
            response_time: elapsed_ms,
            details: format!("certificate valid, {remaining_days} day(s) remaining"),
        }
    }
}
