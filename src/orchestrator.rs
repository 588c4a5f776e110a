//! Internal-to-public event bridging and the request/response surface
//!
//! The orchestrator is the only consumer of the internal bus. Every
//! internal event is sanitized, enriched where needed and re-emitted on
//! the public bus, which the IPC broadcast bridge relays to the renderer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::SiteCache;
use crate::checker::MonitorChecker;
use crate::domain::history::{HistoryEntry, normalize_history_limit};
use crate::domain::site::{Site, sanitize_sites};
use crate::domain::status::StatusUpdate;
use crate::events::bus::{Envelope, EventBus};
use crate::events::types::{CacheScope, InternalEvent, PublicEvent, SyncDelta};
use crate::repos::history::HistoryRepository;
use crate::repos::settings::SettingsRepository;
use crate::repos::site::SiteRepository;
use crate::scheduler::MonitorScheduler;
use crate::storage::backup::{BackupPayload, create_backup};
use crate::storage::engine::StorageEngine;
use crate::utils::error::Result;

pub struct Orchestrator {
    engine: Arc<StorageEngine>,
    cache: Arc<SiteCache>,
    checker: Arc<MonitorChecker>,
    scheduler: Arc<MonitorScheduler>,
    public_bus: Arc<EventBus<PublicEvent>>,
    internal_bus: Arc<EventBus<InternalEvent>>,
    sites: SiteRepository,
    settings: SettingsRepository,
    history: HistoryRepository,
    /// Snapshot from the previous full sync, for delta computation
    last_sync: Mutex<Option<HashMap<String, Site>>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        cache: Arc<SiteCache>,
        checker: Arc<MonitorChecker>,
        scheduler: Arc<MonitorScheduler>,
        internal_bus: Arc<EventBus<InternalEvent>>,
        public_bus: Arc<EventBus<PublicEvent>>,
    ) -> Self {
        Self {
            sites: SiteRepository::new(engine.clone()),
            settings: SettingsRepository::new(engine.clone()),
            history: HistoryRepository::new(engine.clone()),
            engine,
            cache,
            checker,
            scheduler,
            public_bus,
            internal_bus,
            last_sync: Mutex::new(None),
        }
    }

    /// Subscribe the internal-to-public forwarding. Call once at startup.
    pub fn wire_events(&self) {
        let public_bus = self.public_bus.clone();
        self.internal_bus.subscribe(move |envelope| {
            Self::forward(&public_bus, envelope);
        });
    }

    fn forward(public_bus: &EventBus<PublicEvent>, envelope: &Envelope<InternalEvent>) {
        let correlation = envelope.meta.correlation_id.clone();
        let mut emit = |event: PublicEvent| {
            public_bus.emit_with_correlation(event, correlation.clone());
        };

        match &envelope.event {
            InternalEvent::SiteAdded { site } => {
                emit(PublicEvent::SiteAdded { site: site.clone() });
                emit(PublicEvent::CacheInvalidated {
                    scope: CacheScope::Site {
                        identifier: site.identifier.clone(),
                    },
                });
            }
            InternalEvent::SiteUpdated { site } => {
                emit(PublicEvent::SiteUpdated { site: site.clone() });
                emit(PublicEvent::CacheInvalidated {
                    scope: CacheScope::Site {
                        identifier: site.identifier.clone(),
                    },
                });
            }
            InternalEvent::SiteRemoved {
                identifier,
                cascade,
            } => {
                emit(PublicEvent::SiteRemoved {
                    identifier: identifier.clone(),
                    cascade: *cascade,
                });
                emit(PublicEvent::CacheInvalidated {
                    scope: CacheScope::Site {
                        identifier: identifier.clone(),
                    },
                });
            }
            // The accompanying site:updated event carries the snapshot
            InternalEvent::MonitorAdded { monitor_id, .. } => {
                tracing::debug!("Monitor added: {monitor_id}");
            }
            InternalEvent::MonitorRemoved { monitor_id, .. } => {
                tracing::debug!("Monitor removed: {monitor_id}");
            }
            InternalEvent::MonitorStatusChanged { update } => {
                emit(PublicEvent::MonitorStatusChanged {
                    update: update.clone(),
                });
            }
            InternalEvent::MonitorCheckCompleted { update } => {
                emit(PublicEvent::MonitorCheckCompleted {
                    update: update.clone(),
                });
            }
            // Part of the operation audit trail, not a renderer concern
            InternalEvent::MonitorCheckCancelled {
                monitor_id,
                operation_id,
                ..
            } => {
                tracing::debug!("Check cancelled for {monitor_id} (operation {operation_id})");
            }
            InternalEvent::MonitoringStarted { scope, summary } => {
                emit(PublicEvent::MonitoringStarted {
                    scope: scope.clone(),
                    summary: summary.clone(),
                });
            }
            InternalEvent::MonitoringStopped { scope, summary } => {
                emit(PublicEvent::MonitoringStopped {
                    scope: scope.clone(),
                    summary: summary.clone(),
                });
            }
            InternalEvent::CacheInvalidated { scope } => {
                emit(PublicEvent::CacheInvalidated {
                    scope: scope.clone(),
                });
            }
            InternalEvent::HistoryLimitUpdated {
                new_value,
                previous_value,
            } => {
                emit(PublicEvent::HistoryLimitUpdated {
                    new_value: *new_value,
                    previous_value: *previous_value,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Request surface
    // ------------------------------------------------------------------

    /// Sanitized, de-duplicated site list; refreshes the cache as a side
    /// effect so later lookups are warm
    pub fn get_sites(&self) -> Result<Vec<Site>> {
        let sites = sanitize_sites(self.sites.find_all()?);
        for site in &sites {
            self.cache.insert(site.clone());
        }
        Ok(sites)
    }

    /// Full sync: return the snapshot and broadcast it with a delta
    /// describing what changed since the previous sync
    pub fn full_sync(&self) -> Result<Vec<Site>> {
        let sites = self.get_sites()?;

        let current: HashMap<String, Site> = sites
            .iter()
            .map(|site| (site.identifier.clone(), site.clone()))
            .collect();
        let delta = self
            .last_sync
            .lock()
            .replace(current.clone())
            .map(|previous| compute_delta(&previous, &current));

        self.public_bus.emit(PublicEvent::StateSynchronized {
            sites: sites.clone(),
            delta,
        });
        Ok(sites)
    }

    /// Manual check fast path: runs the check and returns the enriched
    /// update so the renderer can apply it before the broadcast arrives.
    /// `None` means the check was queued behind an in-flight operation.
    pub async fn check_now(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> Result<Option<StatusUpdate>> {
        let update = self
            .checker
            .check_monitor(site_identifier, monitor_id, true)
            .await?;
        if update.is_some() {
            // The next automatic run moves out a full interval
            self.scheduler.reschedule_after_manual(monitor_id);
        }
        Ok(update)
    }

    pub fn get_history_limit(&self) -> Result<u64> {
        self.settings.history_limit()
    }

    /// Normalize and persist a new history limit, publishing the corrected
    /// value alongside the previous one
    pub fn update_history_limit(&self, requested: f64) -> Result<u64> {
        let previous = self.settings.history_limit()?;
        let normalized = normalize_history_limit(requested);
        self.settings.set_history_limit(normalized)?;

        self.internal_bus.emit(InternalEvent::HistoryLimitUpdated {
            new_value: normalized,
            previous_value: previous,
        });
        Ok(normalized)
    }

    pub fn reset_settings(&self) -> Result<()> {
        let previous = self.settings.history_limit()?;
        self.settings.reset()?;
        let restored = self.settings.history_limit()?;
        if restored != previous {
            self.internal_bus.emit(InternalEvent::HistoryLimitUpdated {
                new_value: restored,
                previous_value: previous,
            });
        }
        Ok(())
    }

    pub fn monitor_history(
        &self,
        monitor_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<HistoryEntry>> {
        self.history.find_by_monitor(monitor_id, limit)
    }

    pub fn save_backup(&self) -> Result<BackupPayload> {
        create_backup(&self.engine)
    }

    /// Relay an auto-update status notification to the renderer
    pub fn emit_update_status(&self, status: impl Into<String>) {
        self.public_bus.emit(PublicEvent::UpdateStatus {
            status: status.into(),
        });
    }
}

fn compute_delta(previous: &HashMap<String, Site>, current: &HashMap<String, Site>) -> SyncDelta {
    let mut delta = SyncDelta::default();
    for (identifier, site) in current {
        match previous.get(identifier) {
            None => delta.added.push(identifier.clone()),
            Some(old) if old != site => delta.updated.push(identifier.clone()),
            Some(_) => {}
        }
    }
    for identifier in previous.keys() {
        if !current.contains_key(identifier) {
            delta.removed.push(identifier.clone());
        }
    }
    delta.added.sort();
    delta.updated.sort();
    delta.removed.sort();
    delta
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}
