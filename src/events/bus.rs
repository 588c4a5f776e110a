//! Typed publish-subscribe bus
//!
//! Listeners run synchronously in registration order before `emit`
//! returns, which is what guarantees event ordering across the core.
//! Middleware may transform or drop an event; a failing middleware is
//! logged and skipped so one bad hook cannot break the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

/// Implemented by the event enums carried on a bus
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Stable channel name, e.g. `internal:monitor:status-changed`
    fn event_name(&self) -> &'static str;
}

/// Correlation metadata attached to every emitted event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub correlation_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub bus_id: String,
    pub event_name: String,
}

/// An event plus its metadata; listeners receive a shared reference and
/// clone whatever they keep, so payloads are effectively immutable
#[derive(Debug, Clone)]
pub struct Envelope<E> {
    pub event: E,
    pub meta: EventMetadata,
}

/// Hook running before listeners; may rewrite or drop the envelope
pub trait Middleware<E>: Send + Sync {
    fn name(&self) -> &'static str {
        "middleware"
    }

    /// `Ok(None)` drops the event; `Err` is logged and ignored
    fn process(&self, envelope: Envelope<E>) -> Result<Option<Envelope<E>>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&Envelope<E>) + Send + Sync>;

pub struct EventBus<E> {
    bus_id: String,
    listeners: RwLock<Vec<(SubscriptionId, Listener<E>)>>,
    middleware: RwLock<Vec<Box<dyn Middleware<E>>>>,
    next_subscription: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    #[must_use]
    pub fn new(bus_id: impl Into<String>) -> Self {
        Self {
            bus_id: bus_id.into(),
            listeners: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Envelope<E>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn add_middleware(&self, middleware: Box<dyn Middleware<E>>) {
        self.middleware.write().push(middleware);
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Emit with a fresh correlation id
    pub fn emit(&self, event: E) -> Option<EventMetadata> {
        self.emit_with_correlation(event, uuid::Uuid::new_v4().to_string())
    }

    /// Emit, reusing the caller's correlation id (e.g. an operation id).
    /// Returns the metadata, or `None` when middleware dropped the event.
    pub fn emit_with_correlation(&self, event: E, correlation_id: String) -> Option<EventMetadata> {
        let meta = EventMetadata {
            correlation_id,
            timestamp: Utc::now().timestamp_millis(),
            bus_id: self.bus_id.clone(),
            event_name: event.event_name().to_string(),
        };
        let mut envelope = Envelope { event, meta };

        {
            let middleware = self.middleware.read();
            for hook in middleware.iter() {
                match hook.process(envelope.clone()) {
                    Ok(Some(next)) => envelope = next,
                    Ok(None) => {
                        tracing::debug!(
                            "Event {} dropped by middleware {}",
                            envelope.meta.event_name,
                            hook.name()
                        );
                        return None;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Middleware {} failed on {}: {e}. Continuing.",
                            hook.name(),
                            envelope.meta.event_name
                        );
                    }
                }
            }
        }

        // Snapshot so listeners may subscribe/unsubscribe reentrantly
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&envelope);
        }

        Some(envelope.meta)
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("bus_id", &self.bus_id)
            .finish_non_exhaustive()
    }
}
