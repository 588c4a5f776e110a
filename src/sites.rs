//! Site mutation pipeline
//!
//! All site writes follow the same layered contract: the manager checks
//! invariants (duplicate identifiers, the last-monitor guard, schema
//! validation), the writer performs the repository work in one
//! transaction and updates the cache in place, and only then do the
//! mutation events fire.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cache::SiteCache;
use crate::coordinator::OperationCoordinator;
use crate::domain::monitor::{Monitor, MonitorStatus, ProbeConfig};
use crate::domain::site::{Site, validate_identifier};
use crate::events::bus::EventBus;
use crate::events::types::{CacheScope, InternalEvent};
use crate::repos::history::HistoryRepository;
use crate::repos::monitor::MonitorRepository;
use crate::repos::site::SiteRepository;
use crate::scheduler::{InitialRun, MonitorScheduler};
use crate::storage::engine::StorageEngine;
use crate::utils::error::{Result, WatcherError};

/// Partial update applied to a site row
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export, rename_all = "camelCase")]
pub struct SiteChanges {
    pub name: Option<String>,
    pub monitoring: Option<bool>,
}

/// Partial update applied to a monitor
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export, rename_all = "camelCase")]
pub struct MonitorChanges {
    pub monitoring: Option<bool>,
    pub check_interval: Option<u64>,
    pub timeout: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub probe: Option<ProbeConfig>,
}

pub struct SiteManager {
    engine: Arc<StorageEngine>,
    cache: Arc<SiteCache>,
    coordinator: Arc<OperationCoordinator>,
    scheduler: Arc<MonitorScheduler>,
    internal_bus: Arc<EventBus<InternalEvent>>,
    sites: SiteRepository,
}

impl SiteManager {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        cache: Arc<SiteCache>,
        coordinator: Arc<OperationCoordinator>,
        scheduler: Arc<MonitorScheduler>,
        internal_bus: Arc<EventBus<InternalEvent>>,
    ) -> Self {
        Self {
            sites: SiteRepository::new(engine.clone()),
            engine,
            cache,
            coordinator,
            scheduler,
            internal_bus,
        }
    }

    // ------------------------------------------------------------------
    // Site operations
    // ------------------------------------------------------------------

    pub fn add_site(&self, mut site: Site) -> Result<Site> {
        validate_identifier(&site.identifier)?;
        if site.monitors.is_empty() {
            return Err(WatcherError::field_validation(
                "monitors",
                "a site needs at least one monitor",
            ));
        }
        if self.cache.get(&site.identifier).is_some()
            || self
                .engine
                .transaction(|tx| SiteRepository::exists_tx(tx, &site.identifier))?
        {
            return Err(WatcherError::field_validation(
                "identifier",
                format!("site identifier already exists: {}", site.identifier),
            ));
        }

        // Fresh monitors start pending with no runtime state
        for monitor in &mut site.monitors {
            monitor.status = MonitorStatus::Pending;
            monitor.response_time = None;
            monitor.last_checked = None;
            monitor.active_operations.clear();
        }
        site.validate()?;

        let stored = self.write_site(&site)?;
        self.cache.insert(stored.clone());
        self.internal_bus.emit(InternalEvent::SiteAdded {
            site: stored.clone(),
        });

        // Newly added monitors begin checking right away
        if stored.monitoring {
            for monitor in &stored.monitors {
                if monitor.monitoring {
                    self.scheduler.start(
                        &stored.identifier,
                        &monitor.id,
                        Duration::from_millis(monitor.check_interval),
                        InitialRun::Immediate,
                    );
                }
            }
        }

        Ok(stored)
    }

    pub fn update_site(&self, identifier: &str, changes: &SiteChanges) -> Result<Site> {
        let mut site = self.require_site(identifier)?;
        if let Some(name) = &changes.name {
            site.name.clone_from(name);
        }
        if let Some(monitoring) = changes.monitoring {
            site.monitoring = monitoring;
        }

        self.engine.transaction(|tx| SiteRepository::upsert_tx(tx, &site))?;
        self.cache.insert(site.clone());
        self.internal_bus.emit(InternalEvent::SiteUpdated {
            site: site.clone(),
        });
        Ok(site)
    }

    /// Remove a site, cascading monitors and history in one transaction.
    /// In-flight operations are cancelled before the transaction opens.
    pub fn remove_site(&self, identifier: &str) -> Result<bool> {
        let Some(site) = self.find_site(identifier)? else {
            return Ok(false);
        };

        for monitor in &site.monitors {
            self.coordinator.cancel(&monitor.id);
            self.scheduler.stop(&monitor.id);
        }

        let removed = self.engine.transaction(|tx| {
            for monitor in &site.monitors {
                HistoryRepository::delete_by_monitor_tx(tx, &monitor.id)?;
            }
            MonitorRepository::delete_by_site_tx(tx, identifier)?;
            SiteRepository::delete_tx(tx, identifier)
        })?;

        self.cache.remove(identifier);
        if removed {
            self.internal_bus.emit(InternalEvent::SiteRemoved {
                identifier: identifier.to_string(),
                cascade: true,
            });
        }
        Ok(removed)
    }

    /// Remove every site. Emits one bulk cache invalidation instead of
    /// per-site removal events.
    pub fn delete_all_sites(&self) -> Result<usize> {
        self.coordinator.cancel_all();
        self.scheduler.stop_all();

        let removed = self.engine.transaction(|tx| {
            HistoryRepository::delete_all_tx(tx)?;
            MonitorRepository::delete_all_tx(tx)?;
            let count = SiteRepository::delete_all_tx(tx)?;
            Ok(count)
        })?;

        self.cache.clear();
        self.internal_bus.emit(InternalEvent::CacheInvalidated {
            scope: CacheScope::All,
        });
        tracing::info!("Deleted all sites ({removed} row(s))");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Monitor operations
    // ------------------------------------------------------------------

    pub fn add_monitor(&self, site_identifier: &str, mut monitor: Monitor) -> Result<Site> {
        let site = self.require_site(site_identifier)?;

        monitor.status = MonitorStatus::Pending;
        monitor.response_time = None;
        monitor.last_checked = None;
        monitor.active_operations.clear();
        monitor.validate()?;

        let position = site.monitors.len() as i64;
        let monitor_id = self.engine.transaction(|tx| {
            MonitorRepository::upsert_tx(tx, site_identifier, &monitor, position)
        })?;

        let updated = self.reload_into_cache(site_identifier)?;
        self.internal_bus.emit(InternalEvent::MonitorAdded {
            site_identifier: site_identifier.to_string(),
            monitor_id: monitor_id.clone(),
        });
        self.internal_bus.emit(InternalEvent::SiteUpdated {
            site: updated.clone(),
        });

        if updated.monitoring && monitor.monitoring {
            self.scheduler.start(
                site_identifier,
                &monitor_id,
                Duration::from_millis(monitor.check_interval),
                InitialRun::Immediate,
            );
        }
        Ok(updated)
    }

    pub fn update_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
        changes: &MonitorChanges,
    ) -> Result<Site> {
        let site = self.require_site(site_identifier)?;
        let position = site
            .monitors
            .iter()
            .position(|m| m.id == monitor_id)
            .ok_or_else(|| WatcherError::not_found("monitor", monitor_id))?;

        let mut monitor = site.monitors[position].clone();
        if let Some(monitoring) = changes.monitoring {
            monitor.monitoring = monitoring;
        }
        if let Some(check_interval) = changes.check_interval {
            monitor.check_interval = check_interval;
        }
        if let Some(timeout) = changes.timeout {
            monitor.timeout = timeout;
        }
        if let Some(retry_attempts) = changes.retry_attempts {
            monitor.retry_attempts = retry_attempts;
        }
        if let Some(probe) = &changes.probe {
            monitor.probe = probe.clone();
        }
        monitor.validate()?;

        // An edit invalidates whatever check is currently running
        self.coordinator.cancel(monitor_id);

        self.engine.transaction(|tx| {
            MonitorRepository::upsert_tx(tx, site_identifier, &monitor, position as i64)
        })?;

        let updated = self.reload_into_cache(site_identifier)?;
        self.internal_bus.emit(InternalEvent::SiteUpdated {
            site: updated.clone(),
        });

        // Timer reconciliation honors the updated interval
        if updated.monitoring && monitor.monitoring {
            self.scheduler.start(
                site_identifier,
                monitor_id,
                Duration::from_millis(monitor.check_interval),
                InitialRun::Immediate,
            );
        } else {
            self.scheduler.stop(monitor_id);
        }
        Ok(updated)
    }

    pub fn remove_monitor(&self, site_identifier: &str, monitor_id: &str) -> Result<Site> {
        let site = self.require_site(site_identifier)?;
        if site.find_monitor(monitor_id).is_none() {
            return Err(WatcherError::not_found("monitor", monitor_id));
        }
        if site.monitors.len() <= 1 {
            return Err(WatcherError::field_validation(
                "monitors",
                "cannot remove the last monitor of a site",
            ));
        }

        self.coordinator.cancel(monitor_id);
        self.scheduler.stop(monitor_id);

        self.engine.transaction(|tx| {
            HistoryRepository::delete_by_monitor_tx(tx, monitor_id)?;
            MonitorRepository::delete_tx(tx, monitor_id)
        })?;

        let updated = self.reload_into_cache(site_identifier)?;
        self.internal_bus.emit(InternalEvent::MonitorRemoved {
            site_identifier: site_identifier.to_string(),
            monitor_id: monitor_id.to_string(),
        });
        self.internal_bus.emit(InternalEvent::SiteUpdated {
            site: updated.clone(),
        });
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn write_site(&self, site: &Site) -> Result<Site> {
        self.engine.transaction(|tx| {
            SiteRepository::upsert_tx(tx, site)?;
            for (position, monitor) in site.monitors.iter().enumerate() {
                MonitorRepository::upsert_tx(tx, &site.identifier, monitor, position as i64)?;
            }
            SiteRepository::find_by_identifier_tx(tx, &site.identifier)?
                .ok_or_else(|| WatcherError::not_found("site", &site.identifier))
        })
    }

    fn reload_into_cache(&self, identifier: &str) -> Result<Site> {
        let site = self
            .sites
            .find_by_identifier(identifier)?
            .ok_or_else(|| WatcherError::not_found("site", identifier))?;
        self.cache.insert(site.clone());
        Ok(site)
    }

    fn find_site(&self, identifier: &str) -> Result<Option<Site>> {
        if let Some(site) = self.cache.get(identifier) {
            return Ok(Some(site));
        }
        self.sites.find_by_identifier(identifier)
    }

    fn require_site(&self, identifier: &str) -> Result<Site> {
        self.find_site(identifier)?
            .ok_or_else(|| WatcherError::not_found("site", identifier))
    }
}

impl std::fmt::Debug for SiteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteManager").finish_non_exhaustive()
    }
}
