//! Cron-driven scheduler on tokio tasks

use super::{Job, Scheduler};
use crate::common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One tokio task per registered job, all sharing one cancellation token.
///
/// Expressions use six fields: `sec min hour day-of-month month day-of-week`.
/// Occurrences missed while a run was still in flight are skipped.
pub struct CronScheduler {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::with_cancel(&CancellationToken::new())
    }

    /// Scheduler that also stops when `parent` is cancelled
    pub fn with_cancel(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    fn schedule(&mut self, expr: &str, job: Job) -> Result<()> {
        let schedule = Schedule::from_str(expr)?;
        let handle = tokio::spawn(run_job(
            schedule,
            expr.to_string(),
            job,
            self.cancel.clone(),
        ));
        self.tasks.push(handle);
        info!("Scheduled job on '{}'", expr);
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!("Scheduled job task failed: {}", e);
            }
        }
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_job(schedule: Schedule, expr: String, job: Job, cancel: CancellationToken) {
    let mut from: DateTime<Utc> = Utc::now();

    loop {
        let Some(next) = schedule.after(&from).next() else {
            info!("Schedule '{}' has no further occurrences", expr);
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(schedule = %expr, at = %next, "running scheduled job");
        job(cancel.clone()).await;

        if cancel.is_cancelled() {
            break;
        }
        from = next.max(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_invalid_expression_rejected() {
        let mut scheduler = CronScheduler::new();
        let job: Job = Arc::new(|_: CancellationToken| async {}.boxed());
        assert!(scheduler.schedule("not a cron", job).is_err());
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_runs_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(Notify::new());
        let (counter, signal) = (runs.clone(), ran.clone());
        let job: Job = Arc::new(move |_: CancellationToken| {
            let (counter, signal) = (counter.clone(), signal.clone());
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                signal.notify_one();
            }
            .boxed()
        });

        let mut scheduler = CronScheduler::new();
        scheduler.schedule("* * * * * *", job).unwrap();
        tokio::time::timeout(Duration::from_secs(5), ran.notified())
            .await
            .expect("job never fired");
        scheduler.stop().await;

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_run() {
        let finished = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Notify::new());
        let (flag, signal) = (finished.clone(), started.clone());
        let job: Job = Arc::new(move |cancel: CancellationToken| {
            let (flag, signal) = (flag.clone(), signal.clone());
            async move {
                signal.notify_one();
                cancel.cancelled().await;
                flag.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let mut scheduler = CronScheduler::new();
        scheduler.schedule("* * * * * *", job).unwrap();
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("job never started");
        scheduler.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
