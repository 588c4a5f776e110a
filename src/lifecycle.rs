//! Start/stop flows for monitors, sites and the whole fleet
//!
//! Every operation is idempotent. Batch operations run sequentially so
//! their transactions never overlap, and partial failures land in the
//! summary instead of being thrown.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::SiteCache;
use crate::coordinator::OperationCoordinator;
use crate::domain::monitor::MonitorStatus;
use crate::domain::site::Site;
use crate::domain::status::MonitoringSummary;
use crate::events::bus::EventBus;
use crate::events::types::{InternalEvent, MonitoringScope};
use crate::repos::monitor::MonitorRepository;
use crate::repos::site::SiteRepository;
use crate::scheduler::{InitialRun, MonitorScheduler};
use crate::storage::engine::StorageEngine;
use crate::utils::error::{Result, WatcherError};

pub struct MonitoringLifecycle {
    engine: Arc<StorageEngine>,
    cache: Arc<SiteCache>,
    scheduler: Arc<MonitorScheduler>,
    coordinator: Arc<OperationCoordinator>,
    internal_bus: Arc<EventBus<InternalEvent>>,
    sites: SiteRepository,
}

impl MonitoringLifecycle {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        cache: Arc<SiteCache>,
        scheduler: Arc<MonitorScheduler>,
        coordinator: Arc<OperationCoordinator>,
        internal_bus: Arc<EventBus<InternalEvent>>,
    ) -> Self {
        Self {
            sites: SiteRepository::new(engine.clone()),
            engine,
            cache,
            scheduler,
            coordinator,
            internal_bus,
        }
    }

    // ------------------------------------------------------------------
    // Single monitor
    // ------------------------------------------------------------------

    pub async fn start_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> Result<MonitoringSummary> {
        let mut summary = MonitoringSummary::default();
        self.start_one(site_identifier, monitor_id).await?;
        summary.record_success();

        self.internal_bus.emit(InternalEvent::MonitoringStarted {
            scope: MonitoringScope::Monitor {
                site_identifier: site_identifier.to_string(),
                monitor_id: monitor_id.to_string(),
            },
            summary: summary.clone(),
        });
        Ok(summary)
    }

    pub async fn stop_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> Result<MonitoringSummary> {
        let mut summary = MonitoringSummary::default();
        self.stop_one(site_identifier, monitor_id).await?;
        summary.record_success();

        self.internal_bus.emit(InternalEvent::MonitoringStopped {
            scope: MonitoringScope::Monitor {
                site_identifier: site_identifier.to_string(),
                monitor_id: monitor_id.to_string(),
            },
            summary: summary.clone(),
        });
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Site scope
    // ------------------------------------------------------------------

    pub async fn start_site(&self, site_identifier: &str) -> Result<MonitoringSummary> {
        let site = self.require_site(site_identifier).await?;
        self.set_site_flag(site_identifier, true)?;

        let summary = self.apply_sequentially(&site, true).await;
        self.internal_bus.emit(InternalEvent::MonitoringStarted {
            scope: MonitoringScope::Site {
                site_identifier: site_identifier.to_string(),
            },
            summary: summary.clone(),
        });
        Ok(summary)
    }

    pub async fn stop_site(&self, site_identifier: &str) -> Result<MonitoringSummary> {
        let site = self.require_site(site_identifier).await?;
        self.set_site_flag(site_identifier, false)?;

        let summary = self.apply_sequentially(&site, false).await;
        self.internal_bus.emit(InternalEvent::MonitoringStopped {
            scope: MonitoringScope::Site {
                site_identifier: site_identifier.to_string(),
            },
            summary: summary.clone(),
        });
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Fleet scope
    // ------------------------------------------------------------------

    pub async fn start_all(&self) -> Result<MonitoringSummary> {
        let mut summary = MonitoringSummary::default();
        for site in self.sites.find_all()? {
            self.set_site_flag(&site.identifier, true)?;
            summary.merge(self.apply_sequentially(&site, true).await);
        }
        self.internal_bus.emit(InternalEvent::MonitoringStarted {
            scope: MonitoringScope::All,
            summary: summary.clone(),
        });
        Ok(summary)
    }

    pub async fn stop_all(&self) -> Result<MonitoringSummary> {
        let mut summary = MonitoringSummary::default();
        for site in self.sites.find_all()? {
            self.set_site_flag(&site.identifier, false)?;
            summary.merge(self.apply_sequentially(&site, false).await);
        }
        self.internal_bus.emit(InternalEvent::MonitoringStopped {
            scope: MonitoringScope::All,
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Startup path: bring timers back for everything flagged monitoring,
    /// staggered so a large fleet does not check all at once. No flags are
    /// flipped and no events fire.
    pub fn resume_schedules(&self, sites: &[Site]) -> usize {
        let mut resumed = 0;
        for site in sites {
            if !site.monitoring {
                continue;
            }
            for monitor in &site.monitors {
                if monitor.monitoring {
                    self.scheduler.start(
                        &site.identifier,
                        &monitor.id,
                        Duration::from_millis(monitor.check_interval),
                        InitialRun::Staggered,
                    );
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            tracing::info!("Resumed {resumed} monitor schedule(s)");
        }
        resumed
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn apply_sequentially(&self, site: &Site, start: bool) -> MonitoringSummary {
        let mut summary = MonitoringSummary::default();
        for monitor in &site.monitors {
            let result = if start {
                self.start_one(&site.identifier, &monitor.id).await
            } else {
                self.stop_one(&site.identifier, &monitor.id).await
            };
            match result {
                Ok(()) => summary.record_success(),
                Err(e) => summary.record_failure(&monitor.id, e.to_string()),
            }
        }
        summary
    }

    async fn start_one(&self, site_identifier: &str, monitor_id: &str) -> Result<()> {
        let site = self.require_site(site_identifier).await?;
        let monitor = site
            .find_monitor(monitor_id)
            .ok_or_else(|| WatcherError::not_found("monitor", monitor_id))?;

        if monitor.monitoring && self.scheduler.is_scheduled(monitor_id) {
            return Ok(());
        }

        self.engine
            .transaction(|tx| MonitorRepository::set_monitoring_tx(tx, monitor_id, true))?;
        self.cache.with_site_mut(site_identifier, |site| {
            if let Some(cached) = site.find_monitor_mut(monitor_id) {
                cached.monitoring = true;
                if cached.status == MonitorStatus::Paused {
                    cached.status = MonitorStatus::Pending;
                }
            }
        });
        self.scheduler.start(
            site_identifier,
            monitor_id,
            Duration::from_millis(monitor.check_interval),
            InitialRun::Immediate,
        );
        Ok(())
    }

    async fn stop_one(&self, site_identifier: &str, monitor_id: &str) -> Result<()> {
        let site = self.require_site(site_identifier).await?;
        let monitor = site
            .find_monitor(monitor_id)
            .ok_or_else(|| WatcherError::not_found("monitor", monitor_id))?;

        if !monitor.monitoring && !self.scheduler.is_scheduled(monitor_id) {
            return Ok(());
        }

        self.coordinator.cancel(monitor_id);
        self.scheduler.stop(monitor_id);
        self.engine
            .transaction(|tx| MonitorRepository::set_monitoring_tx(tx, monitor_id, false))?;
        self.cache.with_site_mut(site_identifier, |site| {
            if let Some(cached) = site.find_monitor_mut(monitor_id) {
                cached.monitoring = false;
                cached.status = MonitorStatus::Paused;
                cached.active_operations.clear();
            }
        });
        Ok(())
    }

    fn set_site_flag(&self, site_identifier: &str, monitoring: bool) -> Result<()> {
        self.engine
            .transaction(|tx| SiteRepository::set_monitoring_tx(tx, site_identifier, monitoring))?;
        self.cache.with_site_mut(site_identifier, |site| {
            site.monitoring = monitoring;
        });
        Ok(())
    }

    async fn require_site(&self, site_identifier: &str) -> Result<Site> {
        let sites = self.sites.clone();
        let identifier = site_identifier.to_string();
        self.cache
            .get_or_load(site_identifier, move || async move {
                sites.find_by_identifier(&identifier)
            })
            .await?
            .ok_or_else(|| WatcherError::not_found("site", site_identifier))
    }
}

impl std::fmt::Debug for MonitoringLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringLifecycle").finish_non_exhaustive()
    }
}
