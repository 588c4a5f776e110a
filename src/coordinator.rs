//! Single-flight operation registry
//!
//! At most one check runs per monitor at any time. Manual checks arriving
//! while an operation is outstanding are queued (one deep, duplicates
//! collapse); automatic ones are rejected. Every operation carries a hard
//! deadline that fires the cancellation token if the check overstays.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::utils::error::{Result, WatcherError};

/// Handle given to the checker for one granted operation
#[derive(Debug, Clone)]
pub struct OperationHandle {
    pub operation_id: String,
    pub token: CancellationToken,
}

/// Result of asking for an operation slot
#[derive(Debug)]
pub enum BeginOutcome {
    /// Slot granted; run the check
    Begun(OperationHandle),
    /// A manual check was queued behind the outstanding operation
    QueuedManual,
}

/// Returned by [`OperationCoordinator::complete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedOperation {
    pub monitor_id: String,
    /// Whether a queued manual check should run now
    pub queued_manual: bool,
}

struct InFlight {
    operation_id: String,
    token: CancellationToken,
    queued_manual: bool,
    deadline_task: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
pub struct OperationCoordinator {
    operations: Mutex<HashMap<String, InFlight>>,
}

impl OperationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the slot for `monitor_id`.
    ///
    /// Operation ids are opaque and non-guessable. The hard deadline is the
    /// monitor timeout plus the cleanup buffer; when it elapses the token
    /// is cancelled, which is the hard kill for the running check.
    pub fn begin(
        &self,
        monitor_id: &str,
        manual: bool,
        hard_deadline: Duration,
    ) -> Result<BeginOutcome> {
        let mut operations = self.operations.lock();

        if let Some(existing) = operations.get_mut(monitor_id) {
            if manual {
                if existing.queued_manual {
                    tracing::debug!("Collapsing duplicate queued manual check for {monitor_id}");
                } else {
                    tracing::debug!("Queueing manual check for {monitor_id}");
                }
                existing.queued_manual = true;
                return Ok(BeginOutcome::QueuedManual);
            }
            return Err(WatcherError::OperationInFlight {
                monitor_id: monitor_id.to_string(),
            });
        }

        let operation_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        let deadline_token = token.clone();
        let deadline_monitor = monitor_id.to_string();
        let deadline_task = tokio::spawn(async move {
            tokio::time::sleep(hard_deadline).await;
            tracing::warn!(
                "Operation deadline elapsed for monitor {deadline_monitor}; aborting"
            );
            deadline_token.cancel();
        });

        operations.insert(
            monitor_id.to_string(),
            InFlight {
                operation_id: operation_id.clone(),
                token: token.clone(),
                queued_manual: false,
                deadline_task,
            },
        );

        Ok(BeginOutcome::Begun(OperationHandle {
            operation_id,
            token,
        }))
    }

    /// Record the result of an operation and release its slot.
    /// Completing an unknown (already released) operation is a no-op.
    pub fn complete(&self, operation_id: &str) -> Option<CompletedOperation> {
        let mut operations = self.operations.lock();
        let monitor_id = operations
            .iter()
            .find(|(_, in_flight)| in_flight.operation_id == operation_id)
            .map(|(monitor_id, _)| monitor_id.clone())?;

        let in_flight = operations.remove(&monitor_id)?;
        in_flight.deadline_task.abort();
        Some(CompletedOperation {
            monitor_id,
            queued_manual: in_flight.queued_manual,
        })
    }

    /// Abort the outstanding operation for a monitor. Idempotent.
    pub fn cancel(&self, monitor_id: &str) -> bool {
        let removed = self.operations.lock().remove(monitor_id);
        match removed {
            Some(in_flight) => {
                in_flight.deadline_task.abort();
                in_flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Abort everything; used on shutdown
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<InFlight> = self.operations.lock().drain().map(|(_, op)| op).collect();
        let count = drained.len();
        for in_flight in drained {
            in_flight.deadline_task.abort();
            in_flight.token.cancel();
        }
        if count > 0 {
            tracing::info!("Cancelled {count} in-flight operation(s)");
        }
        count
    }

    #[must_use]
    pub fn has_operation(&self, monitor_id: &str) -> bool {
        self.operations.lock().contains_key(monitor_id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.operations.lock().len()
    }
}

impl std::fmt::Debug for OperationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCoordinator")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(10);

    fn begun(outcome: BeginOutcome) -> OperationHandle {
        match outcome {
            BeginOutcome::Begun(handle) => handle,
            BeginOutcome::QueuedManual => panic!("expected a granted slot"),
        }
    }

    #[tokio::test]
    async fn test_single_flight_rejects_second_automatic() {
        let coordinator = OperationCoordinator::new();
        let _handle = begun(coordinator.begin("m1", false, DEADLINE).unwrap());

        let err = coordinator.begin("m1", false, DEADLINE).unwrap_err();
        assert_eq!(err.code(), "OPERATION_IN_FLIGHT");
        assert_eq!(coordinator.active_count(), 1);
    }

    #[tokio::test]
    async fn test_manual_checks_queue_and_collapse() {
        let coordinator = OperationCoordinator::new();
        let handle = begun(coordinator.begin("m1", false, DEADLINE).unwrap());

        assert!(matches!(
            coordinator.begin("m1", true, DEADLINE).unwrap(),
            BeginOutcome::QueuedManual
        ));
        // The queue is one deep; a second manual collapses into it
        assert!(matches!(
            coordinator.begin("m1", true, DEADLINE).unwrap(),
            BeginOutcome::QueuedManual
        ));

        let completed = coordinator.complete(&handle.operation_id).unwrap();
        assert_eq!(completed.monitor_id, "m1");
        assert!(completed.queued_manual);
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let coordinator = OperationCoordinator::new();
        let handle = begun(coordinator.begin("m1", false, DEADLINE).unwrap());

        assert!(coordinator.complete(&handle.operation_id).is_some());
        assert!(coordinator.complete(&handle.operation_id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_triggers_token_and_is_idempotent() {
        let coordinator = OperationCoordinator::new();
        let handle = begun(coordinator.begin("m1", false, DEADLINE).unwrap());
        assert!(!handle.token.is_cancelled());

        assert!(coordinator.cancel("m1"));
        assert!(handle.token.is_cancelled());
        assert!(!coordinator.cancel("m1"));
    }

    #[tokio::test]
    async fn test_cancel_all_drains_everything() {
        let coordinator = OperationCoordinator::new();
        let first = begun(coordinator.begin("m1", false, DEADLINE).unwrap());
        let second = begun(coordinator.begin("m2", false, DEADLINE).unwrap());

        assert_eq!(coordinator.cancel_all(), 2);
        assert!(first.token.is_cancelled());
        assert!(second.token.is_cancelled());
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_the_hard_kill() {
        let coordinator = OperationCoordinator::new();
        let handle = begun(
            coordinator
                .begin("m1", false, Duration::from_millis(500))
                .unwrap(),
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        // Let the deadline task run
        tokio::task::yield_now().await;
        assert!(handle.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_operation_ids_are_unique() {
        let coordinator = OperationCoordinator::new();
        let first = begun(coordinator.begin("m1", false, DEADLINE).unwrap());
        coordinator.complete(&first.operation_id);
        let second = begun(coordinator.begin("m1", false, DEADLINE).unwrap());
        assert_ne!(first.operation_id, second.operation_id);
    }
}
