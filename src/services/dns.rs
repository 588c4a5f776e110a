//! DNS record resolution probe

use std::str::FromStr;
use std::time::Instant;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct DnsService {
    resolver: TokioAsyncResolver,
}

impl DnsService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::Dns {
            host,
            record_type,
            expected_value,
        } = &monitor.probe
        else {
            return Ok(mismatched_probe("dns", monitor));
        };

        let Ok(record_type) = RecordType::from_str(&record_type.to_ascii_uppercase()) else {
            return Ok(CheckOutcome::down(
                0,
                format!("unsupported record type: {record_type}"),
            ));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        // Dropping the lookup future on cancellation releases the socket
        match guard(token, limit, self.resolver.lookup(host.as_str(), record_type)).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let details = if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                    format!("no {record_type} records (ENOTFOUND)")
                } else {
                    format!("resolution failed: {e}")
                };
                Ok(CheckOutcome::down(elapsed, details))
            }
            Guarded::Done(Ok(lookup)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let records: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
                Ok(evaluate_records(
                    record_type,
                    &records,
                    expected_value.as_deref(),
                    elapsed,
                ))
            }
        }
    }
}

impl Default for DnsService {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorService for DnsService {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

/// Assert the resolved records against the optional expected value
#[must_use]
pub fn evaluate_records(
    record_type: RecordType,
    records: &[String],
    expected: Option<&str>,
    elapsed_ms: u64,
) -> CheckOutcome {
    if records.is_empty() {
        return CheckOutcome::down(elapsed_ms, format!("no {record_type} records"));
    }

    match expected {
        None => CheckOutcome::up(
            elapsed_ms,
            format!("DNS {record_type} {} record(s) in {elapsed_ms} ms", records.len()),
        ),
        Some(expected) => {
            let matched = records.iter().any(|record| {
                record.eq_ignore_ascii_case(expected)
                    || record.to_lowercase().contains(&expected.to_lowercase())
            });
            if matched {
                CheckOutcome::up(
                    elapsed_ms,
                    format!("DNS {record_type} matched in {elapsed_ms} ms"),
                )
            } else {
                CheckOutcome::down(
                    elapsed_ms,
                    format!("DNS {record_type} value mismatch"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::HistoryStatus;

    #[test]
    fn test_record_type_parsing_covers_supported_set() {
        for tag in crate::domain::monitor::DNS_RECORD_TYPES {
            assert!(
                RecordType::from_str(tag).is_ok(),
                "resolver should understand {tag}"
            );
        }
    }

    #[test]
    fn test_evaluate_without_expectation() {
        let records = vec!["93.184.216.34".to_string()];
        let outcome = evaluate_records(RecordType::A, &records, None, 12);
        assert_eq!(outcome.status, HistoryStatus::Up);
        assert!(outcome.details.contains("DNS A"));
    }

    #[test]
    fn test_evaluate_expected_value_matching() {
        let records = vec!["10 mail.example.com.".to_string()];

        let hit = evaluate_records(RecordType::MX, &records, Some("mail.example.com"), 5);
        assert_eq!(hit.status, HistoryStatus::Up);

        let miss = evaluate_records(RecordType::MX, &records, Some("other.example.com"), 5);
        assert_eq!(miss.status, HistoryStatus::Down);
    }

    #[test]
    fn test_evaluate_empty_records_is_down() {
        let outcome = evaluate_records(RecordType::TXT, &[], None, 5);
        assert_eq!(outcome.status, HistoryStatus::Down);
    }
}
