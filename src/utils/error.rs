/// Centralized error handling for the monitoring core
///
/// # Error Handling Strategy
///
/// - **Library code**: typed errors via `thiserror`, propagated with `?`
/// - **Monitor services**: convert transport failures into normalized
///   check outcomes; only programming errors escape as panics
/// - **IPC boundary**: every remaining error is flattened into the
///   `{ code, message, details }` envelope via [`WatcherError::code`]
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatcherError>;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Input failed schema or invariant validation
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A referenced entity does not exist
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// Single-flight policy rejection
    #[error("an operation is already in flight for monitor {monitor_id}")]
    OperationInFlight { monitor_id: String },

    /// Cancellation; expected, never logged as a failure
    #[error("operation aborted")]
    Aborted,

    /// Probe-level timeout
    #[error("timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Underlying database constraint or IO failure
    #[error("transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    /// Fatal; aborts startup
    #[error("migration {version} failed: {message}")]
    Migration { version: i64, message: String },

    /// Invalid paths or options at init
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure from a monitor service
    #[error("network error: {message}")]
    Network {
        message: String,
        code: Option<String>,
    },

    /// IO errors (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WatcherError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn field_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: None,
        }
    }

    pub fn network_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Machine-readable code surfaced in the IPC error envelope
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            WatcherError::Validation { .. } => "VALIDATION_ERROR",
            WatcherError::NotFound { .. } => "NOT_FOUND",
            WatcherError::OperationInFlight { .. } => "OPERATION_IN_FLIGHT",
            WatcherError::Aborted => "ABORTED",
            WatcherError::Timeout { .. } => "TIMEOUT",
            WatcherError::Transaction(_) => "TRANSACTION_FAILED",
            WatcherError::Migration { .. } => "MIGRATION_FAILED",
            WatcherError::Configuration(_) => "CONFIGURATION_ERROR",
            WatcherError::Network { .. } => "NETWORK_ERROR",
            WatcherError::Io(_) => "IO_ERROR",
            WatcherError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether this error represents cancellation rather than failure
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, WatcherError::Aborted)
    }
}
