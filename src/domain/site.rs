use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::MAX_IDENTIFIER_LEN;
use crate::domain::monitor::Monitor;
use crate::utils::error::{Result, WatcherError};

/// Display name applied when a site has an empty name
pub const UNNAMED_SITE: &str = "Unnamed Site";

/// A named grouping of monitors sharing an identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct Site {
    /// Opaque unique key; validated on every write and on load
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    /// Whether scheduling is enabled at the site level
    #[serde(default = "default_true")]
    pub monitoring: bool,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

fn default_true() -> bool {
    true
}

impl Site {
    /// Name shown in the UI, falling back to a default for empty names
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNNAMED_SITE
        } else {
            &self.name
        }
    }

    #[must_use]
    pub fn find_monitor(&self, monitor_id: &str) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.id == monitor_id)
    }

    #[must_use]
    pub fn find_monitor_mut(&mut self, monitor_id: &str) -> Option<&mut Monitor> {
        self.monitors.iter_mut().find(|m| m.id == monitor_id)
    }

    /// Validate the identifier and every monitor
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.identifier)?;
        for monitor in &self.monitors {
            monitor.validate()?;
        }
        Ok(())
    }
}

/// Validate a site identifier: non-empty, bounded, printable ASCII-safe
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(WatcherError::field_validation(
            "identifier",
            "must not be empty",
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(WatcherError::field_validation(
            "identifier",
            format!("must be at most {MAX_IDENTIFIER_LEN} characters"),
        ));
    }
    if identifier.chars().any(|c| c.is_ascii_control()) {
        return Err(WatcherError::field_validation(
            "identifier",
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Drop duplicate identifiers from a loaded snapshot, first occurrence wins
#[must_use]
pub fn sanitize_sites(sites: Vec<Site>) -> Vec<Site> {
    let mut seen: HashSet<String> = HashSet::with_capacity(sites.len());
    let mut result = Vec::with_capacity(sites.len());

    for site in sites {
        if seen.insert(site.identifier.clone()) {
            result.push(site);
        } else {
            tracing::warn!(
                "Dropping duplicate site identifier from snapshot: {}",
                site.identifier
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::monitor::ProbeConfig;

    fn site(identifier: &str) -> Site {
        Site {
            identifier: identifier.into(),
            name: String::new(),
            monitoring: true,
            monitors: vec![],
        }
    }

    #[test]
    fn test_display_name_falls_back() {
        let mut s = site("s1");
        assert_eq!(s.display_name(), UNNAMED_SITE);

        s.name = "Example".into();
        assert_eq!(s.display_name(), "Example");
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("s1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("has\ncontrol").is_err());
        assert!(validate_identifier("has\x07bell").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_sanitize_drops_duplicates_first_wins() {
        let mut a = site("dup");
        a.name = "first".into();
        let mut b = site("dup");
        b.name = "second".into();
        let c = site("unique");

        let sanitized = sanitize_sites(vec![a, b, c]);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized[0].identifier, "dup");
        assert_eq!(sanitized[0].name, "first");
        assert_eq!(sanitized[1].identifier, "unique");
    }

    #[test]
    fn test_site_validation_covers_monitors() {
        let mut s = site("s1");
        s.monitors.push(Monitor {
            id: "m1".into(),
            monitoring: true,
            status: Default::default(),
            check_interval: 1, // below minimum
            timeout: 1_000,
            retry_attempts: 0,
            response_time: None,
            last_checked: None,
            active_operations: vec![],
            probe: ProbeConfig::Http {
                url: "https://example.com".into(),
            },
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_find_monitor() {
        let mut s = site("s1");
        assert!(s.find_monitor("m1").is_none());
        s.monitors.push(Monitor {
            id: "m1".into(),
            monitoring: true,
            status: Default::default(),
            check_interval: 60_000,
            timeout: 5_000,
            retry_attempts: 0,
            response_time: None,
            last_checked: None,
            active_operations: vec![],
            probe: ProbeConfig::Ping {
                host: "example.com".into(),
            },
        });
        assert!(s.find_monitor("m1").is_some());
    }
}
