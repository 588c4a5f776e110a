use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log level configuration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    #[must_use]
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Get default log level based on build configuration
    #[must_use]
    pub fn default_for_build() -> Self {
        #[cfg(debug_assertions)]
        {
            LogLevel::Debug
        }
        #[cfg(not(debug_assertions))]
        {
            LogLevel::Info
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::default_for_build()
    }
}

/// Initialize the logging system
///
/// Sets up tracing with both console and file output.
/// Log files rotate daily and live in the app's log directory.
pub fn init_logging(log_dir: &Path, log_level: LogLevel) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log directory: {e}"))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix("uptime-watcher.log")
        .max_log_files(7)
        .build(log_dir)
        .map_err(|e| format!("Failed to create log file appender: {e}"))?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_line_number(true);

    let level = log_level.to_tracing_level();

    // Probe transports are chatty at debug level; keep them at warn
    let mut env_filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper_util=warn".parse().map_err(|e| format!("{e}"))?)
        .add_directive("hickory_resolver=warn".parse().map_err(|e| format!("{e}"))?)
        .add_directive("hickory_proto=warn".parse().map_err(|e| format!("{e}"))?)
        .add_directive("rustls=warn".parse().map_err(|e| format!("{e}"))?);

    let crate_directive = format!("uptime_watcher={log_level}");
    env_filter = env_filter
        .add_directive(crate_directive.parse().map_err(|e| format!("{e}"))?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    tracing::info!("Logging initialized at level: {log_level}");
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}
