//! Application container
//!
//! Builds the whole dependency graph explicitly at startup instead of
//! reaching for globals, so teardown and tests stay deterministic.
//! `init` migrates the schema, sanitizes runtime columns, loads the site
//! cache, registers the IPC surface and resumes the schedulers.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::SiteCache;
use crate::checker::{CheckTiming, CheckerRunner, MonitorChecker};
use crate::config::CoreConfig;
use crate::coordinator::OperationCoordinator;
use crate::events::bus::EventBus;
use crate::events::types::{InternalEvent, PublicEvent};
use crate::ipc::broadcast::BroadcastBridge;
use crate::ipc::handlers::{CoreHandles, EXPECTED_CHANNELS, register_core_handlers};
use crate::ipc::registry::{IpcRegistry, IpcResponse};
use crate::lifecycle::MonitoringLifecycle;
use crate::orchestrator::Orchestrator;
use crate::repos::monitor::MonitorRepository;
use crate::scheduler::{MonitorScheduler, SchedulerTiming};
use crate::services::{HttpClient, MonitorServiceRegistry};
use crate::sites::SiteManager;
use crate::storage::engine::StorageEngine;
use crate::storage::migrations::apply_migrations;
use crate::utils::error::Result;

pub struct App {
    pub config: CoreConfig,
    pub engine: Arc<StorageEngine>,
    pub cache: Arc<SiteCache>,
    pub coordinator: Arc<OperationCoordinator>,
    pub scheduler: Arc<MonitorScheduler>,
    pub checker: Arc<MonitorChecker>,
    pub lifecycle: Arc<MonitoringLifecycle>,
    pub site_manager: Arc<SiteManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub internal_bus: Arc<EventBus<InternalEvent>>,
    pub public_bus: Arc<EventBus<PublicEvent>>,
    pub ipc: Arc<IpcRegistry>,
    pub broadcast: Arc<BroadcastBridge>,
}

impl App {
    /// Initialize the core against the configured data directory.
    /// Migration failures are fatal and propagate.
    pub async fn init(config: CoreConfig) -> Result<Self> {
        let engine = Arc::new(StorageEngine::open(&config.data_dir)?);
        Self::bootstrap(engine, config).await
    }

    /// Initialize against an ephemeral in-memory database (tests)
    pub async fn init_in_memory(config: CoreConfig) -> Result<Self> {
        let engine = Arc::new(StorageEngine::open_in_memory()?);
        Self::bootstrap(engine, config).await
    }

    async fn bootstrap(engine: Arc<StorageEngine>, config: CoreConfig) -> Result<Self> {
        apply_migrations(&engine)?;

        // No operation survives a restart
        let stale = MonitorRepository::new(engine.clone()).clear_all_active_operations()?;
        if stale > 0 {
            tracing::info!("Cleared stale active operations on {stale} monitor(s)");
        }

        let internal_bus = Arc::new(EventBus::<InternalEvent>::new("internal"));
        let public_bus = Arc::new(EventBus::<PublicEvent>::new("public"));
        let cache = Arc::new(SiteCache::new(
            Duration::from_millis(config.cache_ttl_ms),
            config.cache_max_size,
            Duration::from_millis(crate::config::CACHE_DEBOUNCE_MS),
            internal_bus.clone(),
        ));
        let coordinator = Arc::new(OperationCoordinator::new());

        let http_client = Arc::new(HttpClient::new(config.max_per_host_requests)?);
        let services = Arc::new(MonitorServiceRegistry::new(http_client));

        let checker = Arc::new(MonitorChecker::new(
            engine.clone(),
            cache.clone(),
            coordinator.clone(),
            services,
            internal_bus.clone(),
            CheckTiming::default(),
        ));
        let scheduler = Arc::new(MonitorScheduler::new(
            Arc::new(CheckerRunner(checker.clone())),
            SchedulerTiming::default(),
        ));
        let lifecycle = Arc::new(MonitoringLifecycle::new(
            engine.clone(),
            cache.clone(),
            scheduler.clone(),
            coordinator.clone(),
            internal_bus.clone(),
        ));
        let site_manager = Arc::new(SiteManager::new(
            engine.clone(),
            cache.clone(),
            coordinator.clone(),
            scheduler.clone(),
            internal_bus.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            engine.clone(),
            cache.clone(),
            checker.clone(),
            scheduler.clone(),
            internal_bus.clone(),
            public_bus.clone(),
        ));
        orchestrator.wire_events();

        let broadcast = Arc::new(BroadcastBridge::new(256));
        broadcast.attach(&public_bus);

        let ipc = Arc::new(IpcRegistry::new());
        register_core_handlers(
            &ipc,
            &CoreHandles {
                orchestrator: orchestrator.clone(),
                site_manager: site_manager.clone(),
                lifecycle: lifecycle.clone(),
            },
        )?;
        let missing = ipc.verify_handlers(EXPECTED_CHANNELS);
        debug_assert!(missing.is_empty(), "missing IPC handlers: {missing:?}");

        // Warm the cache and bring the timers back
        let sites = orchestrator.get_sites()?;
        lifecycle.resume_schedules(&sites);

        tracing::info!("Core initialized with {} site(s)", sites.len());

        Ok(Self {
            config,
            engine,
            cache,
            coordinator,
            scheduler,
            checker,
            lifecycle,
            site_manager,
            orchestrator,
            internal_bus,
            public_bus,
            ipc,
            broadcast,
        })
    }

    /// Convenience passthrough for the windowed shell
    pub async fn invoke(&self, channel: &str, params: Vec<serde_json::Value>) -> IpcResponse {
        self.ipc.invoke(channel, params).await
    }

    /// Orderly shutdown: cancel operations, stop timers, drop handlers.
    /// The event bus is synchronous, so it is drained by construction;
    /// the database handle closes when the last engine reference drops.
    pub fn teardown(&self) {
        self.coordinator.cancel_all();
        self.scheduler.stop_all();
        self.ipc.clear();
        tracing::info!("Core teardown complete");
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("sites_cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}
