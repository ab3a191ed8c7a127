//! src/services/scheduler.rs
//!
//! Minimal cron scheduler driving background maintenance.
//!
//! Tasks are registered as `(name, cron expression, task)` and driven by a
//! single dispatcher loop. Each run is spawned on its own tokio task, timed,
//! and isolated: errors and panics are logged and never reach the dispatcher
//! or other tasks. A task never overlaps with itself; a fire that arrives
//! while the previous run is still in flight is skipped.

use super::bucket_service::BucketService;
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::{FutureExt, future::BoxFuture};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const REMOVE_ARCHIVED_BUCKETS_TASK: &str = "remove_archived_buckets";
/// Top of every hour (`sec min hour day-of-month month day-of-week`).
pub const HOURLY: &str = "0 0 * * * *";
pub const DEFAULT_ARCHIVE_RETENTION: Duration = Duration::from_secs(72 * 60 * 60);

pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid task name `{0}`, task names must be snake_case")]
    InvalidTaskName(String),
    #[error("task `{0}` is already registered")]
    DuplicateTask(String),
    #[error("invalid schedule `{expression}` for task `{name}`: {source}")]
    InvalidSchedule {
        name: String,
        expression: String,
        source: cron::error::Error,
    },
}

struct Job {
    name: String,
    schedule: Schedule,
    task: TaskFn,
    running: Arc<AtomicBool>,
}

/// Clears the in-flight flag even if the run panics or is aborted.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(
        &mut self,
        name: &str,
        expression: &str,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !is_snake_case(name) {
            return Err(SchedulerError::InvalidTaskName(name.to_string()));
        }
        if self.jobs.iter().any(|job| job.name == name) {
            return Err(SchedulerError::DuplicateTask(name.to_string()));
        }

        let schedule =
            Schedule::from_str(expression).map_err(|source| SchedulerError::InvalidSchedule {
                name: name.to_string(),
                expression: expression.to_string(),
                source,
            })?;

        self.jobs.push(Job {
            name: name.to_string(),
            schedule,
            task: Arc::new(move || task().boxed()),
            running: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name.as_str()).collect()
    }

    /// First fire time of task `name` strictly after `after`.
    pub fn next_run(&self, name: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|job| job.name == name)
            .and_then(|job| job.schedule.after(after).next())
    }

    /// Dispatch registered tasks until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(tasks = ?self.task_names(), "scheduler started");

        let mut next_runs: Vec<Option<DateTime<Utc>>> = self
            .jobs
            .iter()
            .map(|job| job.schedule.upcoming(Utc).next())
            .collect();

        loop {
            let Some(fire_at) = next_runs.iter().flatten().min().copied() else {
                shutdown.cancelled().await;
                break;
            };

            let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            for (job, next) in self.jobs.iter().zip(next_runs.iter_mut()) {
                if let Some(at) = *next {
                    if at <= fire_at {
                        job.dispatch();
                        *next = next_fire(&job.schedule, at, Utc::now());
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}

impl Job {
    fn dispatch(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!(task = %self.name, "previous run still in progress, skipping");
            return;
        }

        let guard = RunningGuard(self.running.clone());
        let name = self.name.clone();
        let task = self.task.clone();

        tokio::spawn(async move {
            let _guard = guard;
            info!(task = %name, "starting task");
            let started = Instant::now();

            let outcome = AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await;

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(Ok(())) => info!(task = %name, elapsed_ms, "task finished"),
                Ok(Err(err)) => error!(task = %name, elapsed_ms, error = ?err, "task failed"),
                Err(panic) => error!(
                    task = %name,
                    elapsed_ms,
                    panic = panic_message(panic.as_ref()),
                    "task panicked"
                ),
            }
        });
    }
}

/// Next fire time after a run scheduled at `last`. Slots missed while the
/// dispatcher was stalled are skipped rather than replayed.
fn next_fire(
    schedule: &Schedule,
    last: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule.after(&last.max(now)).next()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Matches `^[a-z0-9]+(_[a-z0-9]+)*$`.
fn is_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name.split('_').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

/// One retention sweep: drop buckets archived for longer than `retention`.
pub async fn remove_archived_buckets(
    buckets: &BucketService,
    retention: Duration,
) -> anyhow::Result<u64> {
    let removed = buckets
        .remove_buckets_archived_for_more_than(retention)
        .await?;

    if removed > 0 {
        info!(amount = removed, "removed buckets");
    } else {
        info!("no buckets were removed");
    }
    Ok(removed)
}

/// Scheduler with the hourly retention sweep registered.
pub fn retention_scheduler(
    buckets: BucketService,
    retention: Duration,
) -> Result<Scheduler, SchedulerError> {
    let mut scheduler = Scheduler::new();
    scheduler.register(REMOVE_ARCHIVED_BUCKETS_TASK, HOURLY, move || {
        let buckets = buckets.clone();
        async move { remove_archived_buckets(&buckets, retention).await.map(|_| ()) }
    })?;
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const EVERY_SECOND: &str = "* * * * * *";

    #[test]
    fn snake_case_names() {
        for valid in ["remove_archived_buckets", "task", "a1_b2", "000"] {
            assert!(is_snake_case(valid), "{valid}");
        }
        for invalid in ["", "_lead", "trail_", "double__under", "Upper", "with-dash", "sp ace"] {
            assert!(!is_snake_case(invalid), "{invalid}");
        }
    }

    #[test]
    fn register_rejects_bad_names_and_schedules() {
        let mut scheduler = Scheduler::new();

        let err = scheduler
            .register("RemoveStuff", HOURLY, || async { Ok::<(), anyhow::Error>(()) })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTaskName(_)));

        let err = scheduler
            .register("remove_stuff", "every hour please", || async { Ok::<(), anyhow::Error>(()) })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));

        scheduler
            .register("remove_stuff", HOURLY, || async { Ok::<(), anyhow::Error>(()) })
            .unwrap();
        let err = scheduler
            .register("remove_stuff", HOURLY, || async { Ok::<(), anyhow::Error>(()) })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask(_)));

        assert_eq!(scheduler.task_names(), vec!["remove_stuff"]);
    }

    #[test]
    fn hourly_schedule_fires_on_the_hour() {
        let schedule = Schedule::from_str(HOURLY).unwrap();
        let start = DateTime::parse_from_rfc3339("2026-01-01T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next: Vec<_> = schedule.after(&start).take(2).collect();
        assert_eq!(next[0].to_rfc3339(), "2026-01-01T11:00:00+00:00");
        assert_eq!(next[1].to_rfc3339(), "2026-01-01T12:00:00+00:00");
    }

    #[test]
    fn missed_slots_are_not_replayed() {
        let schedule = Schedule::from_str(HOURLY).unwrap();
        let last = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2026-01-01T15:20:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let next = next_fire(&schedule, last, now).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-01-01T16:00:00+00:00");

        // On time: the following slot.
        let next = next_fire(&schedule, last, last).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-01-01T11:00:00+00:00");
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_dispatch() {
        let healthy = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicUsize::new(0));
        let panicking = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new();
        let counter = healthy.clone();
        scheduler
            .register("healthy", EVERY_SECOND, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            })
            .unwrap();
        let counter = failing.clone();
        scheduler
            .register("failing", EVERY_SECOND, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("sweep failed"))
                }
            })
            .unwrap();
        let counter = panicking.clone();
        scheduler
            .register("panicking", EVERY_SECOND, move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < usize::MAX {
                        panic!("task blew up");
                    }
                    Ok(())
                }
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        dispatcher.await.unwrap();

        assert!(healthy.load(Ordering::SeqCst) >= 2);
        assert!(failing.load(Ordering::SeqCst) >= 2);
        assert!(panicking.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn runs_never_overlap() {
        let started = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new();
        let counter = started.clone();
        scheduler
            .register("slow", EVERY_SECOND, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), anyhow::Error>(())
                }
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        dispatcher.await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_scheduler_waits_for_shutdown() {
        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(Scheduler::new().run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .unwrap()
            .unwrap();
    }
}
