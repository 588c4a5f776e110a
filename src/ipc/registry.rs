//! Typed invoke-channel registry
//!
//! Handlers are registered once (duplicates are rejected), parameters are
//! validated by count and kind before the handler runs, and every call is
//! wrapped in the standard `{ success, data | error }` envelope with a
//! duration metric.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::utils::error::{Result, WatcherError};

/// Structured error carried over the IPC boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct IpcErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Standard response envelope for every invoke channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcErrorPayload>,
}

impl IpcResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(IpcErrorPayload {
                code: code.into(),
                message: message.into(),
                details,
            }),
        }
    }

    /// Flatten a core error into the envelope, redacting messages that
    /// could leak storage internals to the renderer
    #[must_use]
    pub fn from_error(error: &WatcherError) -> Self {
        let message = match error {
            WatcherError::Transaction(_) => "internal storage error".to_string(),
            WatcherError::Io(_) => "internal IO error".to_string(),
            WatcherError::Serialization(_) => "internal serialization error".to_string(),
            other => other.to_string(),
        };
        let details = match error {
            WatcherError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };
        Self::err(error.code(), message, details)
    }
}

/// Expected shape of one positional parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
            ParamKind::Any => "any",
        }
    }
}

/// Per-channel parameter contract: count plus per-position kind
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    kinds: Vec<ParamKind>,
}

impl ParamSpec {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of(kinds: &[ParamKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
        }
    }

    fn validate(&self, params: &[Value]) -> std::result::Result<(), IpcErrorPayload> {
        if params.len() != self.kinds.len() {
            return Err(IpcErrorPayload {
                code: "VALIDATION_ERROR".into(),
                message: format!(
                    "expected {} parameter(s), got {}",
                    self.kinds.len(),
                    params.len()
                ),
                details: None,
            });
        }
        for (index, (kind, value)) in self.kinds.iter().zip(params).enumerate() {
            if !kind.matches(value) {
                return Err(IpcErrorPayload {
                    code: "VALIDATION_ERROR".into(),
                    message: format!("parameter {index} must be a {}", kind.label()),
                    details: Some(serde_json::json!({ "index": index })),
                });
            }
        }
        Ok(())
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type HandlerFn = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

struct RegisteredHandler {
    spec: ParamSpec,
    handler: HandlerFn,
}

#[derive(Default)]
pub struct IpcRegistry {
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
}

impl IpcRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; duplicate registration is rejected and leaves
    /// the existing handler untouched
    pub fn register(
        &self,
        channel: &str,
        spec: ParamSpec,
        handler: impl Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static,
    ) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(channel) {
            return Err(WatcherError::validation(format!(
                "handler already registered for channel: {channel}"
            )));
        }
        handlers.insert(
            channel.to_string(),
            RegisteredHandler {
                spec,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Invoke a channel with positional JSON parameters
    pub async fn invoke(&self, channel: &str, params: Vec<Value>) -> IpcResponse {
        let started = Instant::now();

        let Some((spec, handler)) = ({
            let handlers = self.handlers.read();
            handlers
                .get(channel)
                .map(|registered| (registered.spec.clone(), registered.handler.clone()))
        }) else {
            tracing::warn!("Invoke on unknown channel: {channel}");
            return IpcResponse::err(
                "UNKNOWN_CHANNEL",
                format!("no handler registered for channel: {channel}"),
                None,
            );
        };

        if let Err(error) = spec.validate(&params) {
            tracing::debug!(
                "Parameter validation failed on {channel} after {:?}",
                started.elapsed()
            );
            return IpcResponse {
                success: false,
                data: None,
                error: Some(error),
            };
        }

        let response = match handler(params).await {
            Ok(data) => IpcResponse::ok(data),
            Err(error) => {
                if !error.is_abort() {
                    tracing::warn!("Handler for {channel} failed: {error}");
                }
                IpcResponse::from_error(&error)
            }
        };

        tracing::debug!(
            "Invoke {channel} finished in {:?} (success: {})",
            started.elapsed(),
            response.success
        );
        response
    }

    /// Registered channel inventory, sorted for stable diagnostics
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Diagnostics handshake: report expected channels that are missing
    #[must_use]
    pub fn verify_handlers(&self, expected: &[&str]) -> Vec<String> {
        let handlers = self.handlers.read();
        let missing: Vec<String> = expected
            .iter()
            .filter(|channel| !handlers.contains_key(**channel))
            .map(|channel| (*channel).to_string())
            .collect();
        if !missing.is_empty() {
            tracing::warn!("Missing IPC handlers: {missing:?}");
        }
        missing
    }

    /// Unregister everything; used at teardown
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl std::fmt::Debug for IpcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcRegistry")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}
