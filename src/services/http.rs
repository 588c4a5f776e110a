//! HTTP-family probes
//!
//! One service covers the whole family; the probe variant selects the
//! assertion applied to the response.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::domain::history::HistoryStatus;
use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::http_client::{HttpClient, describe_transport_error};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

pub struct HttpService {
    client: Arc<HttpClient>,
}

impl HttpService {
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let Some(url) = probe_url(&monitor.probe) else {
            return Ok(mismatched_probe("http", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        let attempt = async {
            let _permit = self.client.acquire(url).await;
            let response = self.client.inner().get(url).send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            // Only body-inspecting probes pay for the read
            let body = if needs_body(&monitor.probe) {
                response.text().await?
            } else {
                String::new()
            };
            Ok::<(u16, reqwest::header::HeaderMap, String), reqwest::Error>((status, headers, body))
        };

        match guard(token, limit, attempt).await? {
            Guarded::TimedOut => Ok(CheckOutcome::timed_out(limit)),
            Guarded::Done(Err(e)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(CheckOutcome::down(elapsed, describe_transport_error(&e)))
            }
            Guarded::Done(Ok((status, headers, body))) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(evaluate(&monitor.probe, status, &headers, &body, elapsed))
            }
        }
    }
}

impl MonitorService for HttpService {
    fn name(&self) -> &'static str {
        "http"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}

fn probe_url(probe: &ProbeConfig) -> Option<&str> {
    match probe {
        ProbeConfig::Http { url }
        | ProbeConfig::HttpStatus { url, .. }
        | ProbeConfig::HttpKeyword { url, .. }
        | ProbeConfig::HttpHeader { url, .. }
        | ProbeConfig::HttpJson { url, .. }
        | ProbeConfig::HttpLatency { url, .. } => Some(url),
        _ => None,
    }
}

fn needs_body(probe: &ProbeConfig) -> bool {
    matches!(
        probe,
        ProbeConfig::HttpKeyword { .. } | ProbeConfig::HttpJson { .. }
    )
}

/// Map a response to an outcome according to the probe's assertion
#[must_use]
pub fn evaluate(
    probe: &ProbeConfig,
    status: u16,
    headers: &reqwest::header::HeaderMap,
    body: &str,
    elapsed_ms: u64,
) -> CheckOutcome {
    let base = format!("HTTP {status} in {elapsed_ms} ms");
    match probe {
        ProbeConfig::Http { .. } => CheckOutcome {
            status: classify_status(status),
            response_time: elapsed_ms,
            details: base,
        },
        ProbeConfig::HttpStatus {
            expected_status_code,
            ..
        } => {
            if status == *expected_status_code {
                CheckOutcome::up(elapsed_ms, base)
            } else {
                CheckOutcome::down(
                    elapsed_ms,
                    format!("{base}, expected {expected_status_code}"),
                )
            }
        }
        ProbeConfig::HttpKeyword { body_keyword, .. } => {
            if contains_case_insensitive(body, body_keyword) {
                CheckOutcome::up(elapsed_ms, base)
            } else {
                CheckOutcome::down(elapsed_ms, format!("{base}, keyword not found"))
            }
        }
        ProbeConfig::HttpHeader {
            header_name,
            expected_header_value,
            ..
        } => {
            let actual = headers
                .get(header_name.as_str())
                .and_then(|value| value.to_str().ok());
            match actual {
                Some(actual) if actual.eq_ignore_ascii_case(expected_header_value) => {
                    CheckOutcome::up(elapsed_ms, base)
                }
                Some(_) => CheckOutcome::down(elapsed_ms, format!("{base}, header mismatch")),
                None => CheckOutcome::down(elapsed_ms, format!("{base}, header missing")),
            }
        }
        ProbeConfig::HttpJson {
            json_path,
            expected_json_value,
            ..
        } => match serde_json::from_str::<serde_json::Value>(body) {
            Err(_) => CheckOutcome::down(elapsed_ms, format!("{base}, invalid JSON body")),
            Ok(parsed) => match json_path_lookup(&parsed, json_path) {
                None => CheckOutcome::down(elapsed_ms, format!("{base}, path not found")),
                Some(found) => {
                    if json_value_matches(found, expected_json_value) {
                        CheckOutcome::up(elapsed_ms, base)
                    } else {
                        CheckOutcome::down(elapsed_ms, format!("{base}, value mismatch"))
                    }
                }
            },
        },
        ProbeConfig::HttpLatency {
            max_response_time, ..
        } => {
            let status_class = classify_status(status);
            if status_class != HistoryStatus::Up {
                CheckOutcome {
                    status: status_class,
                    response_time: elapsed_ms,
                    details: base,
                }
            } else if elapsed_ms > *max_response_time {
                CheckOutcome::degraded(
                    elapsed_ms,
                    format!("{base}, above {max_response_time} ms threshold"),
                )
            } else {
                CheckOutcome::up(elapsed_ms, base)
            }
        }
        _ => CheckOutcome::down(elapsed_ms, "internal dispatch error"),
    }
}

/// 2xx/3xx are healthy, 4xx is a hard failure, 5xx counts as degraded
#[must_use]
pub fn classify_status(status: u16) -> HistoryStatus {
    match status {
        200..=399 => HistoryStatus::Up,
        500..=599 => HistoryStatus::Degraded,
        _ => HistoryStatus::Down,
    }
}

fn contains_case_insensitive(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Walk a dotted path through a JSON document; numeric segments index arrays
#[must_use]
pub fn json_path_lookup<'v>(value: &'v serde_json::Value, path: &str) -> Option<&'v serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn json_value_matches(found: &serde_json::Value, expected: &str) -> bool {
    match found {
        serde_json::Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use serde_json::json;

    fn headers_with(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_classify_status_ranges() {
        assert_eq!(classify_status(200), HistoryStatus::Up);
        assert_eq!(classify_status(301), HistoryStatus::Up);
        assert_eq!(classify_status(404), HistoryStatus::Down);
        assert_eq!(classify_status(503), HistoryStatus::Degraded);
        assert_eq!(classify_status(101), HistoryStatus::Down);
    }

    #[test]
    fn test_evaluate_basic_http() {
        let probe = ProbeConfig::Http {
            url: "https://example.com".into(),
        };
        let outcome = evaluate(&probe, 200, &HeaderMap::new(), "", 142);
        assert_eq!(outcome.status, HistoryStatus::Up);
        assert_eq!(outcome.details, "HTTP 200 in 142 ms");

        let outcome = evaluate(&probe, 500, &HeaderMap::new(), "", 20);
        assert_eq!(outcome.status, HistoryStatus::Degraded);
    }

    #[test]
    fn test_evaluate_exact_status() {
        let probe = ProbeConfig::HttpStatus {
            url: "https://example.com".into(),
            expected_status_code: 204,
        };
        assert_eq!(
            evaluate(&probe, 204, &HeaderMap::new(), "", 5).status,
            HistoryStatus::Up
        );
        let miss = evaluate(&probe, 200, &HeaderMap::new(), "", 5);
        assert_eq!(miss.status, HistoryStatus::Down);
        assert!(miss.details.contains("expected 204"));
    }

    #[test]
    fn test_evaluate_keyword_is_case_insensitive() {
        let probe = ProbeConfig::HttpKeyword {
            url: "https://example.com".into(),
            body_keyword: "Welcome".into(),
        };
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), "<h1>WELCOME home</h1>", 5).status,
            HistoryStatus::Up
        );
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), "goodbye", 5).status,
            HistoryStatus::Down
        );
    }

    #[test]
    fn test_evaluate_header_match() {
        let probe = ProbeConfig::HttpHeader {
            url: "https://example.com".into(),
            header_name: "x-served-by".into(),
            expected_header_value: "edge-1".into(),
        };
        assert_eq!(
            evaluate(&probe, 200, &headers_with("x-served-by", "EDGE-1"), "", 5).status,
            HistoryStatus::Up
        );
        assert_eq!(
            evaluate(&probe, 200, &headers_with("x-served-by", "edge-2"), "", 5).status,
            HistoryStatus::Down
        );
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), "", 5).status,
            HistoryStatus::Down
        );
    }

    #[test]
    fn test_evaluate_json_path() {
        let probe = ProbeConfig::HttpJson {
            url: "https://example.com".into(),
            json_path: "data.state".into(),
            expected_json_value: "healthy".into(),
        };
        let body = json!({"data": {"state": "healthy"}}).to_string();
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), &body, 5).status,
            HistoryStatus::Up
        );

        let body = json!({"data": {"state": "broken"}}).to_string();
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), &body, 5).status,
            HistoryStatus::Down
        );

        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), "not json", 5).status,
            HistoryStatus::Down
        );
    }

    #[test]
    fn test_json_path_lookup_handles_arrays_and_numbers() {
        let doc = json!({"items": [{"ok": true}, {"ok": false}], "count": 2});
        assert_eq!(
            json_path_lookup(&doc, "items.0.ok"),
            Some(&serde_json::Value::Bool(true))
        );
        assert!(json_path_lookup(&doc, "items.5.ok").is_none());
        assert!(json_path_lookup(&doc, "missing.path").is_none());
        assert!(json_value_matches(
            json_path_lookup(&doc, "count").unwrap(),
            "2"
        ));
    }

    #[test]
    fn test_evaluate_latency_threshold() {
        let probe = ProbeConfig::HttpLatency {
            url: "https://example.com".into(),
            max_response_time: 100,
        };
        assert_eq!(
            evaluate(&probe, 200, &HeaderMap::new(), "", 80).status,
            HistoryStatus::Up
        );
        let slow = evaluate(&probe, 200, &HeaderMap::new(), "", 150);
        assert_eq!(slow.status, HistoryStatus::Degraded);
        assert!(slow.details.contains("threshold"));

        // A failing status dominates the latency assertion
        assert_eq!(
            evaluate(&probe, 404, &HeaderMap::new(), "", 10).status,
            HistoryStatus::Down
        );
    }
}
