//! One-way broadcast channel to the renderer windows
//!
//! Public events are serialized and fanned out over a tokio broadcast
//! channel; the windowed shell subscribes one receiver per window. The
//! payload carries the same metadata as the in-process bus.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use ts_rs::TS;

use crate::events::bus::{EventBus, EventMetadata};
use crate::events::types::PublicEvent;

/// One broadcast frame: `domain:event-name` channel plus payload
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: Value,
    #[ts(type = "{ correlationId: string, timestamp: number, busId: string, eventName: string }")]
    pub meta: EventMetadata,
}

pub struct BroadcastBridge {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastBridge {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe a renderer window (or a test) to the broadcast stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }

    /// Forward every public event onto the broadcast channel
    pub fn attach(self: &Arc<Self>, bus: &EventBus<PublicEvent>) {
        let bridge = self.clone();
        bus.subscribe(move |envelope| {
            let payload = match serde_json::to_value(&envelope.event) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(
                        "Failed to serialize {} for broadcast: {e}",
                        envelope.meta.event_name
                    );
                    return;
                }
            };
            let message = BroadcastMessage {
                channel: envelope.meta.event_name.clone(),
                payload,
                meta: envelope.meta.clone(),
            };
            // A send error only means no window is currently listening
            let _ = bridge.tx.send(message);
        });
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for BroadcastBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBridge")
            .field("receivers", &self.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_public_events_reach_subscribers() {
        let bus = Arc::new(EventBus::<PublicEvent>::new("public"));
        let bridge = Arc::new(BroadcastBridge::new(16));
        bridge.attach(&bus);

        let mut rx = bridge.subscribe();
        bus.emit(PublicEvent::UpdateStatus {
            status: "checking".into(),
        });

        let message = rx.try_recv().unwrap();
        assert_eq!(message.channel, "update:status");
        assert_eq!(message.payload["status"], "checking");
        assert_eq!(message.meta.event_name, "update:status");
    }

    #[tokio::test]
    async fn test_no_subscriber_is_not_an_error() {
        let bus = Arc::new(EventBus::<PublicEvent>::new("public"));
        let bridge = Arc::new(BroadcastBridge::new(16));
        bridge.attach(&bus);

        // Must not panic with zero receivers
        bus.emit(PublicEvent::UpdateStatus {
            status: "idle".into(),
        });
        assert_eq!(bridge.receiver_count(), 0);
    }
}
