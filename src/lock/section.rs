//! Coordinated sections
//!
//! Runs a callback while holding a distributed lock:
//!
//! ```text
//! Idle -> Acquiring -> Held (watchdog renewing) -> Releasing -> Done
//!              |
//!              +-> Contended (callback never runs)
//! ```
//!
//! The watchdog is stopped and joined before the lock is released. When the
//! section future is dropped instead of finishing (a caller timeout, an
//! aborted task, a panicking callback), the watchdog is cancelled and the
//! release runs on a spawned task. Release failures are logged only; the
//! lease expires on its own.
//!
//! A renewal failure while the callback runs is logged but not signalled to
//! the callback, which keeps running even if another holder has taken the key.

use super::mutex::{AcquireOutcome, DistributedMutex, LockLease};
use super::watchdog::{LeaseWatchdog, MIN_LEASE_TTL};
use crate::common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of running a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome<T> {
    /// The lock was held and the callback returned `Ok`
    Completed(T),
    /// Another holder owns the key; the callback did not run
    Contended,
}

impl<T> SectionOutcome<T> {
    pub fn is_contended(&self) -> bool {
        matches!(self, SectionOutcome::Contended)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            SectionOutcome::Completed(value) => Some(value),
            SectionOutcome::Contended => None,
        }
    }
}

/// Runs callbacks under a lease-renewed distributed lock
#[derive(Debug, Clone)]
pub struct CoordinatedSection {
    mutex: DistributedMutex,
}

impl CoordinatedSection {
    pub fn new(mutex: DistributedMutex) -> Self {
        Self { mutex }
    }

    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }

    /// Run `callback` while holding `key`.
    ///
    /// Store failures during acquisition and callback errors are returned as
    /// `Err`; contention is `Ok(SectionOutcome::Contended)`.
    pub async fn run<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        callback: F,
    ) -> Result<SectionOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_cancel(key, ttl, &CancellationToken::new(), |_| callback())
            .await
    }

    /// Like [`run`](Self::run), bound to the caller's cancellation token.
    ///
    /// `ttl` must be at least [`MIN_LEASE_TTL`] so that renewals land before
    /// the lease expires.
    ///
    /// The callback receives a child token that fires when `cancel` does.
    /// On cancellation the watchdog stops at once, the callback future is
    /// dropped at its next await point, the lock is released on a best-effort
    /// basis, and `Err(Error::Cancelled)` is returned.
    pub async fn run_with_cancel<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        callback: F,
    ) -> Result<SectionOutcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ttl < MIN_LEASE_TTL {
            return Err(Error::InvalidTtl(ttl));
        }

        let lease = match self.mutex.acquire(key, ttl).await? {
            AcquireOutcome::Acquired(lease) => lease,
            AcquireOutcome::Contended => {
                info!(key, "lock contended, skipping section");
                return Ok(SectionOutcome::Contended);
            }
        };

        let section_cancel = cancel.child_token();
        let watchdog = LeaseWatchdog::spawn(self.mutex.clone(), &lease, section_cancel.clone());
        let held = HeldSection::new(self.mutex.clone(), lease, watchdog);
        debug!(key, ?ttl, "section started");

        let result = tokio::select! {
            res = callback(section_cancel.clone()) => res,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        let exit = match &result {
            Ok(_) => SectionExit::Completed,
            Err(Error::Cancelled) => SectionExit::Cancelled,
            Err(_) => SectionExit::Failed,
        };
        held.finish(exit).await;
        result.map(SectionOutcome::Completed)
    }
}

#[derive(Debug, Clone, Copy)]
enum SectionExit {
    Completed,
    Cancelled,
    Failed,
}

/// A held lock plus its watchdog.
///
/// [`finish`](HeldSection::finish) is the normal exit. If the section future
/// is dropped instead (caller timeout, abort, panic in the callback), `Drop`
/// cancels the watchdog and releases the lock on a spawned task.
struct HeldSection {
    mutex: DistributedMutex,
    lease: Option<LockLease>,
    watchdog: Option<LeaseWatchdog>,
    started: Instant,
}

impl HeldSection {
    fn new(mutex: DistributedMutex, lease: LockLease, watchdog: LeaseWatchdog) -> Self {
        mutex.metrics().sections_active.inc();
        Self {
            mutex,
            lease: Some(lease),
            watchdog: Some(watchdog),
            started: Instant::now(),
        }
    }

    /// Stop the watchdog, wait for it, then release the lock
    async fn finish(mut self, exit: SectionExit) {
        let Some(lease) = self.lease.clone() else {
            return;
        };
        let key = lease.key.as_str();

        if let Some(watchdog) = self.watchdog.take() {
            let report = watchdog.stop().await;
            if report.failures > 0 {
                warn!(
                    key,
                    failures = report.failures,
                    renewals = report.renewals,
                    "lease renewal failed during section, exclusivity may have been lost"
                );
            }
        }

        match self.mutex.release(key, &lease.token).await {
            Ok(true) => {}
            Ok(false) => warn!(key, "lease already expired or reclaimed at release"),
            Err(e) => warn!(key, error = %e, "failed to release lock, lease will expire"),
        }
        self.lease = None;

        self.record_exit();
        let metrics = self.mutex.metrics();
        match exit {
            SectionExit::Completed => metrics.sections_completed.inc(),
            SectionExit::Cancelled => metrics.sections_cancelled.inc(),
            SectionExit::Failed => metrics.sections_failed.inc(),
        }
        debug!(key, elapsed = ?self.started.elapsed(), "section finished");
    }

    fn record_exit(&self) {
        let metrics = self.mutex.metrics();
        metrics.sections_active.dec();
        metrics
            .section_duration
            .observe(self.started.elapsed().as_secs_f64() * 1000.0);
    }
}

impl Drop for HeldSection {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        // LeaseWatchdog's own Drop cancels the renewal task
        drop(self.watchdog.take());
        self.record_exit();
        self.mutex.metrics().sections_cancelled.inc();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(key = %lease.key, "section dropped while held, releasing in background");
                let mutex = self.mutex.clone();
                handle.spawn(async move {
                    if let Err(e) = mutex.release(&lease.key, &lease.token).await {
                        warn!(key = %lease.key, error = %e, "failed to release lock, lease will expire");
                    }
                });
            }
            Err(_) => warn!(key = %lease.key, "section dropped outside a runtime, lease will expire"),
        }
    }
}
