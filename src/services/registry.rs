//! Declarative registry mapping monitor types to their services
//!
//! The dispatch match is exhaustive over `MonitorType`, so a new probe
//! kind cannot be added without wiring a service here.

use std::sync::Arc;

use crate::domain::monitor::MonitorType;
use crate::services::cdn::CdnService;
use crate::services::dns::DnsService;
use crate::services::heartbeat::HeartbeatService;
use crate::services::http::HttpService;
use crate::services::http_client::HttpClient;
use crate::services::ping::PingService;
use crate::services::port::PortService;
use crate::services::replication::ReplicationService;
use crate::services::ssl::SslService;
use crate::services::websocket::WebsocketService;
use crate::services::MonitorService;

pub struct MonitorServiceRegistry {
    http: HttpService,
    port: PortService,
    ping: PingService,
    dns: DnsService,
    ssl: SslService,
    websocket: WebsocketService,
    heartbeat: HeartbeatService,
    replication: ReplicationService,
    cdn: CdnService,
}

impl MonitorServiceRegistry {
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            http: HttpService::new(client.clone()),
            port: PortService,
            ping: PingService,
            dns: DnsService::new(),
            ssl: SslService::new(),
            websocket: WebsocketService,
            heartbeat: HeartbeatService::new(client.clone()),
            replication: ReplicationService::new(client.clone()),
            cdn: CdnService::new(client),
        }
    }

    /// Resolve the service handling the given monitor type
    #[must_use]
    pub fn service_for(&self, kind: MonitorType) -> &dyn MonitorService {
        match kind {
            MonitorType::Http
            | MonitorType::HttpStatus
            | MonitorType::HttpKeyword
            | MonitorType::HttpHeader
            | MonitorType::HttpJson
            | MonitorType::HttpLatency => &self.http,
            MonitorType::Port => &self.port,
            MonitorType::Ping => &self.ping,
            MonitorType::Dns => &self.dns,
            MonitorType::Ssl => &self.ssl,
            MonitorType::WebsocketKeepalive => &self.websocket,
            MonitorType::ServerHeartbeat => &self.heartbeat,
            MonitorType::Replication => &self.replication,
            MonitorType::CdnEdgeConsistency => &self.cdn,
        }
    }
}

impl std::fmt::Debug for MonitorServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorServiceRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[tokio::test]
    async fn test_every_monitor_type_has_a_service() {
        let registry =
            MonitorServiceRegistry::new(Arc::new(HttpClient::new(4).unwrap()));
        for kind in MonitorType::iter() {
            let service = registry.service_for(kind);
            assert!(!service.name().is_empty(), "no service for {kind}");
        }
    }

    #[tokio::test]
    async fn test_http_family_shares_one_service() {
        let registry =
            MonitorServiceRegistry::new(Arc::new(HttpClient::new(4).unwrap()));
        assert_eq!(registry.service_for(MonitorType::Http).name(), "http");
        assert_eq!(registry.service_for(MonitorType::HttpJson).name(), "http");
        assert_eq!(registry.service_for(MonitorType::Ping).name(), "ping");
    }
}
