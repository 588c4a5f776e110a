//! Single-probe orchestration
//!
//! Resolves the monitor snapshot, acquires the single-flight slot, runs
//! the protocol service with retries, persists the outcome in one
//! transaction (history append, monitor update, operation release and a
//! throttled retention prune) and emits the lifecycle events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::SiteCache;
use crate::config::{PRUNE_THROTTLE_MS, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS};
use crate::coordinator::{BeginOutcome, OperationCoordinator};
use crate::domain::history::{HistoryEntry, HistoryStatus};
use crate::domain::monitor::{Monitor, MonitorStatus};
use crate::domain::site::Site;
use crate::domain::status::StatusUpdate;
use crate::events::bus::EventBus;
use crate::events::types::InternalEvent;
use crate::repos::history::HistoryRepository;
use crate::repos::monitor::MonitorRepository;
use crate::repos::settings::SettingsRepository;
use crate::repos::site::SiteRepository;
use crate::scheduler::{CheckFeedback, CheckRunner};
use crate::services::{CheckOutcome, MonitorServiceRegistry};
use crate::storage::engine::StorageEngine;
use crate::utils::error::{Result, WatcherError};

/// Retry and pruning knobs, defaulting to the crate constants
#[derive(Debug, Clone, Copy)]
pub struct CheckTiming {
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub prune_throttle: Duration,
}

impl Default for CheckTiming {
    fn default() -> Self {
        Self {
            retry_backoff_base: Duration::from_millis(RETRY_BACKOFF_BASE_MS),
            retry_backoff_max: Duration::from_millis(RETRY_BACKOFF_MAX_MS),
            prune_throttle: Duration::from_millis(PRUNE_THROTTLE_MS),
        }
    }
}

pub struct MonitorChecker {
    engine: Arc<StorageEngine>,
    cache: Arc<SiteCache>,
    sites: SiteRepository,
    settings: SettingsRepository,
    coordinator: Arc<OperationCoordinator>,
    registry: Arc<MonitorServiceRegistry>,
    internal_bus: Arc<EventBus<InternalEvent>>,
    /// Last prune instant and limit per monitor; bounds the count query
    /// frequency while still reacting to a changed retention setting
    prune_marks: Mutex<HashMap<String, (Instant, u64)>>,
    timing: CheckTiming,
}

impl MonitorChecker {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        cache: Arc<SiteCache>,
        coordinator: Arc<OperationCoordinator>,
        registry: Arc<MonitorServiceRegistry>,
        internal_bus: Arc<EventBus<InternalEvent>>,
        timing: CheckTiming,
    ) -> Self {
        Self {
            sites: SiteRepository::new(engine.clone()),
            settings: SettingsRepository::new(engine.clone()),
            engine,
            cache,
            coordinator,
            registry,
            internal_bus,
            prune_marks: Mutex::new(HashMap::new()),
            timing,
        }
    }

    /// Execute one check for a monitor.
    ///
    /// Returns `Ok(None)` when the request was queued behind an outstanding
    /// operation (manual checks only); `Err(OperationInFlight)` when an
    /// automatic check found the slot busy; `Err(Aborted)` when the
    /// operation was cancelled, in which case monitor state is untouched.
    pub async fn check_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
        manual: bool,
    ) -> Result<Option<StatusUpdate>> {
        let mut run_as_manual = manual;
        loop {
            let update = self
                .check_once(site_identifier, monitor_id, run_as_manual)
                .await?;
            match update {
                CheckRound::Queued => return Ok(None),
                CheckRound::Done { update, queued_manual } => {
                    if queued_manual {
                        // Resolve the queued manual check immediately
                        run_as_manual = true;
                        continue;
                    }
                    return Ok(Some(update));
                }
            }
        }
    }

    async fn check_once(
        &self,
        site_identifier: &str,
        monitor_id: &str,
        manual: bool,
    ) -> Result<CheckRound> {
        let site = self.load_site(site_identifier).await?;
        let monitor = site
            .find_monitor(monitor_id)
            .ok_or_else(|| WatcherError::not_found("monitor", monitor_id))?
            .clone();

        let handle = match self
            .coordinator
            .begin(monitor_id, manual, monitor.operation_timeout())?
        {
            BeginOutcome::Begun(handle) => handle,
            BeginOutcome::QueuedManual => return Ok(CheckRound::Queued),
        };
        let operation_id = handle.operation_id.clone();

        if let Err(e) = self.mark_operation_started(site_identifier, monitor_id, &operation_id) {
            self.coordinator.complete(&operation_id);
            return Err(e);
        }

        match self.run_attempts(&monitor, &handle.token).await {
            Err(e) if e.is_abort() => {
                self.abandon_operation(site_identifier, monitor_id, &operation_id);
                Err(WatcherError::Aborted)
            }
            Err(e) => {
                // Defensive: services normalize failures themselves
                let outcome = CheckOutcome::down(0, e.to_string());
                self.finish_check(site_identifier, &monitor, &operation_id, outcome)
            }
            Ok(outcome) => self.finish_check(site_identifier, &monitor, &operation_id, outcome),
        }
    }

    async fn load_site(&self, site_identifier: &str) -> Result<Site> {
        let sites = self.sites.clone();
        let identifier = site_identifier.to_string();
        self.cache
            .get_or_load(site_identifier, move || async move {
                sites.find_by_identifier(&identifier)
            })
            .await?
            .ok_or_else(|| WatcherError::not_found("site", site_identifier))
    }

    fn mark_operation_started(
        &self,
        site_identifier: &str,
        monitor_id: &str,
        operation_id: &str,
    ) -> Result<()> {
        self.engine.transaction(|tx| {
            MonitorRepository::add_active_operation_tx(tx, monitor_id, operation_id)
        })?;
        self.cache.with_site_mut(site_identifier, |site| {
            if let Some(monitor) = site.find_monitor_mut(monitor_id) {
                monitor.active_operations.push(operation_id.to_string());
            }
        });
        Ok(())
    }

    /// Cancellation path: release the operation without touching the
    /// monitor's status columns
    fn abandon_operation(&self, site_identifier: &str, monitor_id: &str, operation_id: &str) {
        let released = self.engine.transaction(|tx| {
            MonitorRepository::remove_active_operation_tx(tx, monitor_id, operation_id)
        });
        if let Err(e) = released {
            tracing::debug!("Could not release operation {operation_id}: {e}");
        }
        self.cache.with_site_mut(site_identifier, |site| {
            if let Some(monitor) = site.find_monitor_mut(monitor_id) {
                monitor.active_operations.retain(|op| op != operation_id);
            }
        });
        self.coordinator.complete(operation_id);

        self.internal_bus.emit_with_correlation(
            InternalEvent::MonitorCheckCancelled {
                site_identifier: site_identifier.to_string(),
                monitor_id: monitor_id.to_string(),
                operation_id: operation_id.to_string(),
            },
            operation_id.to_string(),
        );
    }

    fn finish_check(
        &self,
        site_identifier: &str,
        monitor: &Monitor,
        operation_id: &str,
        outcome: CheckOutcome,
    ) -> Result<CheckRound> {
        let timestamp = Utc::now().timestamp_millis();
        let new_status = MonitorStatus::from(outcome.status);
        let previous_status = monitor.status;
        let history_limit = self.settings.history_limit()?;
        let prune_now = history_limit > 0 && self.should_prune(&monitor.id, history_limit);

        let entry = HistoryEntry {
            monitor_id: monitor.id.clone(),
            timestamp,
            status: outcome.status,
            response_time: outcome.response_time,
            details: outcome.details.clone(),
        };

        let persisted = self.engine.transaction(|tx| {
            HistoryRepository::add_entry_tx(tx, &entry)?;
            MonitorRepository::apply_check_result_tx(
                tx,
                &monitor.id,
                new_status,
                Some(outcome.response_time),
                timestamp,
                operation_id,
            )?;
            if prune_now {
                HistoryRepository::prune_tx(tx, &monitor.id, history_limit)?;
            }
            Ok(())
        });
        if let Err(e) = persisted {
            // Never leave the slot wedged behind a failed transaction
            self.coordinator.complete(operation_id);
            return Err(e);
        }
        if prune_now {
            self.prune_marks
                .lock()
                .insert(monitor.id.clone(), (Instant::now(), history_limit));
        }

        let updated = self.cache.with_site_mut(site_identifier, |site| {
            if let Some(cached) = site.find_monitor_mut(&monitor.id) {
                cached.status = new_status;
                cached.response_time = Some(outcome.response_time);
                cached.last_checked = chrono::DateTime::from_timestamp_millis(timestamp);
                cached.active_operations.retain(|op| op != operation_id);
            }
        });
        if !updated {
            // Entry was evicted mid-check; repopulate from the database
            if let Ok(Some(site)) = self.sites.find_by_identifier(site_identifier) {
                self.cache.insert(site);
            }
        }

        let completed = self.coordinator.complete(operation_id);
        let queued_manual = completed.is_some_and(|c| c.queued_manual);

        let snapshot = self
            .cache
            .get(site_identifier)
            .map_or_else(|| self.sites.find_by_identifier(site_identifier), |s| Ok(Some(s)))?
            .ok_or_else(|| WatcherError::not_found("site", site_identifier))?;

        let update = StatusUpdate {
            site: snapshot,
            monitor_id: monitor.id.clone(),
            previous_status,
            status: new_status,
            response_time: Some(outcome.response_time),
            details: outcome.details,
            timestamp,
            correlation_id: operation_id.to_string(),
        };

        if update.is_transition() {
            self.internal_bus.emit_with_correlation(
                InternalEvent::MonitorStatusChanged {
                    update: update.clone(),
                },
                operation_id.to_string(),
            );
        }
        self.internal_bus.emit_with_correlation(
            InternalEvent::MonitorCheckCompleted {
                update: update.clone(),
            },
            operation_id.to_string(),
        );

        Ok(CheckRound::Done {
            update,
            queued_manual,
        })
    }

    /// Run the service with up to `retry_attempts + 1` tries, sharing the
    /// cancellation token across attempts. Only hard failures retry.
    async fn run_attempts(
        &self,
        monitor: &Monitor,
        token: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let service = self.registry.service_for(monitor.monitor_type());
        let attempts = monitor.retry_attempts.saturating_add(1);
        let mut last_outcome: Option<CheckOutcome> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let exponent = attempt.saturating_sub(1).min(16);
                let backoff = self
                    .timing
                    .retry_backoff_base
                    .saturating_mul(2u32.saturating_pow(exponent))
                    .min(self.timing.retry_backoff_max);
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(WatcherError::Aborted),
                    () = tokio::time::sleep(backoff) => {}
                }
            }

            let outcome = service.check(monitor, token).await?;
            if outcome.status != HistoryStatus::Down {
                return Ok(outcome);
            }
            tracing::debug!(
                "Attempt {}/{} for monitor {} failed: {}",
                attempt + 1,
                attempts,
                monitor.id,
                outcome.details
            );
            last_outcome = Some(outcome);
        }

        Ok(last_outcome.unwrap_or_else(|| CheckOutcome::down(0, "no attempts executed")))
    }

    fn should_prune(&self, monitor_id: &str, limit: u64) -> bool {
        let marks = self.prune_marks.lock();
        match marks.get(monitor_id) {
            Some((last, last_limit)) => {
                *last_limit != limit || last.elapsed() >= self.timing.prune_throttle
            }
            None => true,
        }
    }
}

enum CheckRound {
    Queued,
    Done {
        update: StatusUpdate,
        queued_manual: bool,
    },
}

/// Adapter letting the scheduler drive automatic checks
pub struct CheckerRunner(pub Arc<MonitorChecker>);

impl CheckRunner for CheckerRunner {
    fn run_check<'a>(
        &'a self,
        site_identifier: &'a str,
        monitor_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = CheckFeedback> + Send + 'a>> {
        Box::pin(async move {
            match self
                .0
                .check_monitor(site_identifier, monitor_id, false)
                .await
            {
                Ok(Some(update)) if update.status == MonitorStatus::Down => CheckFeedback::Failure,
                Ok(Some(_)) => CheckFeedback::Success,
                Ok(None) => CheckFeedback::Skipped,
                Err(e) if e.is_abort() => CheckFeedback::Skipped,
                Err(e) => {
                    if matches!(e, WatcherError::OperationInFlight { .. }) {
                        tracing::debug!("Skipping scheduled check for {monitor_id}: {e}");
                    } else {
                        tracing::warn!("Scheduled check for {monitor_id} failed: {e}");
                    }
                    CheckFeedback::Skipped
                }
            }
        })
    }
}
