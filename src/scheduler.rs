//! Per-monitor interval scheduling
//!
//! Each monitoring monitor gets one timer task. Startup is staggered with
//! uniform jitter, failed checks stretch the interval with a capped
//! exponential backoff, and the next delay is always measured from the
//! completion of the previous check so a slow probe can never overlap its
//! own schedule.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{BACKOFF_FACTOR, BACKOFF_MAX_MULTIPLIER, JITTER_CAP_MS};

/// What the checker reports back to the timer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFeedback {
    /// Check completed with a healthy or degraded outcome
    Success,
    /// Check completed down
    Failure,
    /// Check did not run (slot busy, monitor gone, cancelled)
    Skipped,
}

/// Callback the scheduler drives; implemented by the monitor checker
pub trait CheckRunner: Send + Sync + 'static {
    fn run_check<'a>(
        &'a self,
        site_identifier: &'a str,
        monitor_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = CheckFeedback> + Send + 'a>>;
}

/// Scheduling knobs, defaulting to the crate constants
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    pub jitter_cap: Duration,
    pub backoff_factor: f64,
    pub backoff_max_multiplier: u32,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            jitter_cap: Duration::from_millis(JITTER_CAP_MS),
            backoff_factor: BACKOFF_FACTOR,
            backoff_max_multiplier: BACKOFF_MAX_MULTIPLIER,
        }
    }
}

/// Uniform random start delay in `[0, min(interval, jitter_cap)]`
#[must_use]
pub fn staggered_delay(interval: Duration, jitter_cap: Duration) -> Duration {
    let cap = interval.min(jitter_cap);
    if cap.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::rng().random_range(0..=cap.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Delay before the next automatic check given the failure streak
#[must_use]
pub fn backoff_delay(interval: Duration, consecutive_failures: u32, timing: &SchedulerTiming) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let factor = timing
        .backoff_factor
        .powi(consecutive_failures.min(16) as i32);
    let capped = factor.min(f64::from(timing.backoff_max_multiplier));
    interval.mul_f64(capped)
}

/// How the first check of a freshly started timer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialRun {
    /// User-initiated start: check right away
    Immediate,
    /// Fleet startup: stagger to avoid a thundering herd
    Staggered,
}

struct ScheduledTask {
    token: CancellationToken,
    reset: Arc<Notify>,
}

pub struct MonitorScheduler {
    runner: Arc<dyn CheckRunner>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    timing: SchedulerTiming,
}

impl MonitorScheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn CheckRunner>, timing: SchedulerTiming) -> Self {
        Self {
            runner,
            tasks: Mutex::new(HashMap::new()),
            timing,
        }
    }

    /// Start (or restart) the timer for a monitor. Restarting honors an
    /// updated interval, which is the edit-reconciliation path.
    pub fn start(
        &self,
        site_identifier: &str,
        monitor_id: &str,
        interval: Duration,
        initial: InitialRun,
    ) {
        self.stop(monitor_id);

        let token = CancellationToken::new();
        let reset = Arc::new(Notify::new());
        let runner = self.runner.clone();
        let timing = self.timing;
        let site = site_identifier.to_string();
        let monitor = monitor_id.to_string();
        let task_token = token.clone();
        let task_reset = reset.clone();

        tokio::spawn(async move {
            let mut delay = match initial {
                InitialRun::Immediate => Duration::ZERO,
                InitialRun::Staggered => staggered_delay(interval, timing.jitter_cap),
            };
            let mut consecutive_failures: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    () = task_reset.notified() => {
                        // A manual check just completed; next automatic
                        // run moves to now + interval
                        delay = interval;
                        continue;
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                let feedback = runner.run_check(&site, &monitor).await;
                if task_token.is_cancelled() {
                    break;
                }

                consecutive_failures = match feedback {
                    CheckFeedback::Success => 0,
                    CheckFeedback::Failure => consecutive_failures.saturating_add(1),
                    CheckFeedback::Skipped => consecutive_failures,
                };
                delay = backoff_delay(interval, consecutive_failures, &timing);
            }
            tracing::debug!("Timer loop for monitor {monitor} stopped");
        });

        self.tasks
            .lock()
            .insert(monitor_id.to_string(), ScheduledTask { token, reset });
    }

    /// Cancel the timer for a monitor. Idempotent.
    pub fn stop(&self, monitor_id: &str) -> bool {
        match self.tasks.lock().remove(monitor_id) {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) -> usize {
        let drained: Vec<ScheduledTask> =
            self.tasks.lock().drain().map(|(_, task)| task).collect();
        let count = drained.len();
        for task in drained {
            task.token.cancel();
        }
        if count > 0 {
            tracing::info!("Stopped {count} scheduler timer(s)");
        }
        count
    }

    /// After a manual check, push the next automatic run out a full interval
    pub fn reschedule_after_manual(&self, monitor_id: &str) -> bool {
        match self.tasks.lock().get(monitor_id) {
            Some(task) => {
                task.reset.notify_one();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_scheduled(&self, monitor_id: &str) -> bool {
        self.tasks.lock().contains_key(monitor_id)
    }

    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl std::fmt::Debug for MonitorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorScheduler")
            .field("scheduled", &self.scheduled_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRunner {
        checks: AtomicU32,
        feedback: CheckFeedback,
    }

    impl CountingRunner {
        fn new(feedback: CheckFeedback) -> Arc<Self> {
            Arc::new(Self {
                checks: AtomicU32::new(0),
                feedback,
            })
        }

        fn count(&self) -> u32 {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl CheckRunner for CountingRunner {
        fn run_check<'a>(
            &'a self,
            _site_identifier: &'a str,
            _monitor_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = CheckFeedback> + Send + 'a>> {
            Box::pin(async move {
                self.checks.fetch_add(1, Ordering::SeqCst);
                self.feedback
            })
        }
    }

    #[test]
    fn test_staggered_delay_clamps_to_interval() {
        let interval = Duration::from_millis(100);
        let cap = Duration::from_secs(5);
        for _ in 0..50 {
            let delay = staggered_delay(interval, cap);
            assert!(delay <= interval, "jitter must clamp to the interval");
        }
    }

    #[test]
    fn test_staggered_delay_respects_cap() {
        let interval = Duration::from_secs(600);
        let cap = Duration::from_millis(5_000);
        for _ in 0..50 {
            let delay = staggered_delay(interval, cap);
            assert!(delay <= cap);
        }
    }

    #[test]
    fn test_backoff_delay_grows_and_ceils() {
        let timing = SchedulerTiming::default();
        let interval = Duration::from_secs(60);

        assert_eq!(backoff_delay(interval, 0, &timing), interval);
        assert_eq!(backoff_delay(interval, 1, &timing), interval * 2);
        assert_eq!(backoff_delay(interval, 2, &timing), interval * 4);
        assert_eq!(backoff_delay(interval, 3, &timing), interval * 8);
        // Ceiling: factor never exceeds the max multiplier
        assert_eq!(backoff_delay(interval, 10, &timing), interval * 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_start_checks_right_away() {
        let runner = CountingRunner::new(CheckFeedback::Success);
        let scheduler = MonitorScheduler::new(runner.clone(), SchedulerTiming::default());

        scheduler.start("s1", "m1", Duration::from_secs(60), InitialRun::Immediate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.count(), 1);

        // Second check comes a full interval later
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(runner.count(), 2);

        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_backoff_stretches_interval() {
        let runner = CountingRunner::new(CheckFeedback::Failure);
        let scheduler = MonitorScheduler::new(runner.clone(), SchedulerTiming::default());

        scheduler.start("s1", "m1", Duration::from_secs(60), InitialRun::Immediate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.count(), 1);

        // After one failure the next run is 2x the interval out
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(runner.count(), 1, "backoff should delay the second check");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runner.count(), 2);

        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let runner = CountingRunner::new(CheckFeedback::Success);
        let scheduler = MonitorScheduler::new(runner.clone(), SchedulerTiming::default());

        scheduler.start("s1", "m1", Duration::from_secs(60), InitialRun::Immediate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.stop("m1"));
        assert!(!scheduler.is_scheduled("m1"));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(runner.count(), 1, "no checks after stop");
        assert!(!scheduler.stop("m1"), "stop is idempotent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_honors_new_interval() {
        let runner = CountingRunner::new(CheckFeedback::Success);
        let scheduler = MonitorScheduler::new(runner.clone(), SchedulerTiming::default());

        scheduler.start("s1", "m1", Duration::from_secs(600), InitialRun::Immediate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.count(), 1);

        // Edit reconciliation: restart with a much shorter interval
        scheduler.start("s1", "m1", Duration::from_secs(30), InitialRun::Immediate);
        assert_eq!(scheduler.scheduled_count(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runner.count(), 3);

        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reschedule_pushes_next_run_out() {
        let runner = CountingRunner::new(CheckFeedback::Success);
        let scheduler = MonitorScheduler::new(runner.clone(), SchedulerTiming::default());

        scheduler.start("s1", "m1", Duration::from_secs(60), InitialRun::Immediate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.count(), 1);

        // 50 s in, a manual check completes; the run due at 60 s moves
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(scheduler.reschedule_after_manual("m1"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.count(), 1, "original slot should be skipped");
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runner.count(), 2);

        scheduler.stop_all();
    }
}
