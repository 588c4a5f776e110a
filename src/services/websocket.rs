//! WebSocket keepalive probe
//!
//! Opens a connection, sends a ping frame and waits for the pong. A socket
//! that connects but stays silent is degraded; a failed connect is down.

use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::monitor::{Monitor, ProbeConfig};
use crate::services::{CheckOutcome, Guarded, MonitorService, ServiceFuture, guard, mismatched_probe};

const PING_PAYLOAD: &[u8] = b"uptime-watcher";

enum KeepaliveResult {
    Pong(u64),
    Closed,
    ConnectFailed(String),
}

pub struct WebsocketService;

impl WebsocketService {
    async fn keepalive(url: &str) -> KeepaliveResult {
        let (mut socket, _response) = match connect_async(url).await {
            Ok(connected) => connected,
            Err(e) => return KeepaliveResult::ConnectFailed(e.to_string()),
        };

        let started = Instant::now();
        if let Err(e) = socket.send(Message::Ping(PING_PAYLOAD.to_vec())).await {
            return KeepaliveResult::ConnectFailed(format!("ping send failed: {e}"));
        }

        while let Some(frame) = socket.next().await {
            match frame {
                Ok(Message::Pong(_)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    let _ = socket.close(None).await;
                    return KeepaliveResult::Pong(elapsed);
                }
                // Servers may interleave other traffic before the pong
                Ok(_) => {}
                Err(_) => return KeepaliveResult::Closed,
            }
        }
        KeepaliveResult::Closed
    }

    async fn run(&self, monitor: &Monitor, token: &CancellationToken) -> crate::Result<CheckOutcome> {
        let ProbeConfig::WebsocketKeepalive { url } = &monitor.probe else {
            return Ok(mismatched_probe("websocket-keepalive", monitor));
        };

        let limit = monitor.effective_timeout();
        let started = Instant::now();

        match guard(token, limit, Self::keepalive(url)).await? {
            // Timing out while connected means the socket went silent
            Guarded::TimedOut => Ok(CheckOutcome::degraded(
                limit.as_millis() as u64,
                "no pong within window",
            )),
            Guarded::Done(result) => {
                let elapsed = started.elapsed().as_millis() as u64;
                Ok(match result {
                    KeepaliveResult::Pong(pong_ms) => {
                        CheckOutcome::up(pong_ms, format!("pong in {pong_ms} ms"))
                    }
                    KeepaliveResult::Closed => {
                        CheckOutcome::down(elapsed, "connection closed before pong")
                    }
                    KeepaliveResult::ConnectFailed(message) => {
                        CheckOutcome::down(elapsed, format!("connect failed: {message}"))
                    }
                })
            }
        }
    }
}

impl MonitorService for WebsocketService {
    fn name(&self) -> &'static str {
        "websocket-keepalive"
    }

    fn check<'a>(&'a self, monitor: &'a Monitor, token: &'a CancellationToken) -> ServiceFuture<'a> {
        Box::pin(self.run(monitor, token))
    }
}
