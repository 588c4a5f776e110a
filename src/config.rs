use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs as a_fs;

use crate::utils::logging::LogLevel;

// ============================================================================
// Tuning constants
// ============================================================================

/// Added to a monitor's timeout to form the operation-level hard deadline
pub const CLEANUP_BUFFER_MS: u64 = 500;

/// Upper bound on the staggered-start delay applied to scheduler timers
pub const JITTER_CAP_MS: u64 = 5_000;

/// Multiplier applied to the interval after each consecutive failed check
pub const BACKOFF_FACTOR: f64 = 2.0;

/// Failure backoff never stretches the interval beyond this multiple
pub const BACKOFF_MAX_MULTIPLIER: u32 = 8;

/// Base delay between retry attempts inside a single check
pub const RETRY_BACKOFF_BASE_MS: u64 = 500;

/// Ceiling for the intra-check retry backoff
pub const RETRY_BACKOFF_MAX_MS: u64 = 5_000;

/// Monitors may not be scheduled more often than this
pub const MIN_CHECK_INTERVAL_MS: u64 = 5_000;

/// Effective probe timeout is clamped to this baseline
pub const BASELINE_TIMEOUT_MS: u64 = 30_000;

/// Timeout applied when a monitor does not specify one
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on per-monitor retry attempts
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// History rows kept per monitor when the user has not chosen a limit
pub const DEFAULT_HISTORY_LIMIT: u64 = 500;

/// History limits above this clamp down; 0 still means unlimited
pub const MAX_HISTORY_LIMIT: u64 = 10_000;

/// Pruning runs at most once per monitor within this window
pub const PRUNE_THROTTLE_MS: u64 = 30_000;

/// Site identifiers are rejected beyond this length
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Site cache entry time-to-live
pub const CACHE_TTL_MS: u64 = 300_000;

/// Site cache LRU capacity
pub const CACHE_MAX_SIZE: usize = 500;

/// Burst window for collapsing repeated same-key cache invalidations
pub const CACHE_DEBOUNCE_MS: u64 = 100;

/// Concurrent HTTP requests allowed per remote host
pub const MAX_PER_HOST_REQUESTS: usize = 4;

/// Advisory retention carried in backup metadata
pub const BACKUP_RETENTION_HINT_DAYS: u32 = 30;

// ============================================================================
// Core configuration
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Absolute directory holding the database and backups
    pub data_dir: PathBuf,
    /// Per-monitor history retention; 0 disables pruning
    pub history_limit: u64,
    /// Site cache entry TTL in milliseconds
    pub cache_ttl_ms: u64,
    /// Site cache LRU capacity
    pub cache_max_size: usize,
    /// Concurrent HTTP requests allowed per remote host
    pub max_per_host_requests: usize,
    /// Logging verbosity
    pub log_level: LogLevel,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            cache_ttl_ms: CACHE_TTL_MS,
            cache_max_size: CACHE_MAX_SIZE,
            max_per_host_requests: MAX_PER_HOST_REQUESTS,
            log_level: LogLevel::default(),
        }
    }
}

impl CoreConfig {
    /// Configuration rooted at the given data directory, everything else default
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

async fn try_load_config(config_path: &Path) -> Result<CoreConfig> {
    if !config_path.exists() {
        tracing::info!(
            "No config file found at {}. Using defaults.",
            config_path.display()
        );
        return Ok(CoreConfig::default());
    }

    let content = a_fs::read_to_string(config_path)
        .await
        .with_context(|| format!("Failed to read config file from {}", config_path.display()))?;

    match toml::from_str::<CoreConfig>(&content) {
        Ok(config) => {
            tracing::info!("Config loaded from {}", config_path.display());
            Ok(config)
        }
        Err(parse_err) => {
            // Salvage whatever fields parse; defaults fill the rest
            tracing::warn!("Config parsing failed: {parse_err}. Attempting partial load...");

            let parsed: toml::Value = toml::from_str(&content).with_context(|| {
                format!("Config file is not valid TOML at {}", config_path.display())
            })?;

            let mut config = CoreConfig::default();
            if let toml::Value::Table(table) = parsed {
                merge_config_field(&mut config, &table);
            }

            tracing::info!(
                "Partial config loaded from {}. Missing fields filled with defaults.",
                config_path.display()
            );
            Ok(config)
        }
    }
}

/// Merge individual config fields from a TOML table into `CoreConfig`
fn merge_config_field(config: &mut CoreConfig, table: &toml::map::Map<String, toml::Value>) {
    if let Some(toml::Value::String(val)) = table.get("dataDir") {
        config.data_dir = PathBuf::from(val);
    }
    if let Some(toml::Value::Integer(val)) = table.get("historyLimit") {
        config.history_limit = (*val).max(0) as u64;
    }
    if let Some(toml::Value::Integer(val)) = table.get("cacheTtlMs") {
        config.cache_ttl_ms = (*val).max(0) as u64;
    }
    if let Some(toml::Value::Integer(val)) = table.get("cacheMaxSize") {
        config.cache_max_size = (*val).max(1) as usize;
    }
    if let Some(toml::Value::Integer(val)) = table.get("maxPerHostRequests") {
        config.max_per_host_requests = (*val).max(1) as usize;
    }
    if let Some(toml::Value::String(val)) = table.get("logLevel")
        && let Ok(level) = val.parse::<LogLevel>()
    {
        config.log_level = level;
    }
}

pub async fn load_config(config_path: &Path) -> CoreConfig {
    try_load_config(config_path).await.unwrap_or_else(|e| {
        tracing::error!("A critical error occurred during config loading: {e}. Using defaults.");
        CoreConfig::default()
    })
}

pub async fn save_config(config_path: &Path, config: &CoreConfig) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let toml_string = toml::to_string_pretty(config).context("Failed to serialize config")?;
    a_fs::write(config_path, toml_string)
        .await
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;
    tracing::info!("Config saved to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.cache_max_size, CACHE_MAX_SIZE);
        assert!(config.data_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_merge_config_field_basic_types() {
        let mut config = CoreConfig::default();

        let toml_str = r#"
            dataDir = "/var/lib/uptime-watcher"
            historyLimit = 250
            logLevel = "warn"
        "#;

        let parsed: toml::Value = toml::from_str(toml_str).unwrap();
        if let toml::Value::Table(table) = parsed {
            merge_config_field(&mut config, &table);
        }

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/uptime-watcher"));
        assert_eq!(config.history_limit, 250);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_merge_config_field_invalid_types_ignored() {
        let mut config = CoreConfig::default();
        let original_limit = config.history_limit;

        let toml_str = r#"
            historyLimit = "lots"
        "#;

        let parsed: toml::Value = toml::from_str(toml_str).unwrap();
        if let toml::Value::Table(table) = parsed {
            merge_config_field(&mut config, &table);
        }

        assert_eq!(config.history_limit, original_limit);
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.toml")).await;
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = CoreConfig::with_data_dir(dir.path());
        config.history_limit = 42;
        save_config(&path, &config).await.unwrap();

        let reloaded = load_config(&path).await;
        assert_eq!(reloaded.history_limit, 42);
        assert_eq!(reloaded.data_dir, dir.path());
    }
}
