//! Lease watchdog
//!
//! A background task paired with one acquired lease. It extends the lease
//! every `ttl / 2` until its cancellation token fires. Renewal failures are
//! logged and counted but never reach the guarded callback.

use super::mutex::{DistributedMutex, LockLease, LockToken};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Shortest lease a watchdog can keep alive: renewal runs at `ttl / 2`
pub const MIN_LEASE_TTL: Duration = Duration::from_millis(2);

/// Renewal statistics returned when the watchdog is stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    pub renewals: u64,
    pub failures: u64,
}

/// Handle to a running renewal task
///
/// Dropping the handle cancels the task; [`stop`](LeaseWatchdog::stop) also
/// waits for it to exit.
#[derive(Debug)]
pub struct LeaseWatchdog {
    cancel: CancellationToken,
    handle: Option<JoinHandle<WatchdogReport>>,
}

impl LeaseWatchdog {
    /// Renewal period for a lease of `ttl`
    pub fn interval_for(ttl: Duration) -> Duration {
        (ttl / 2).max(Duration::from_millis(1))
    }

    /// Start renewing `lease`. The task exits when `cancel` fires.
    pub fn spawn(mutex: DistributedMutex, lease: &LockLease, cancel: CancellationToken) -> Self {
        let key = lease.key.clone();
        let token = lease.token.clone();
        let ttl = lease.ttl;
        let handle = tokio::spawn(renew_loop(mutex, key, token, ttl, cancel.clone()));

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the task and wait for it to finish
    pub async fn stop(mut self) -> WatchdogReport {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return WatchdogReport::default();
        };
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                error!("Lease watchdog task failed: {}", e);
                WatchdogReport::default()
            }
        }
    }
}

impl Drop for LeaseWatchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn renew_loop(
    mutex: DistributedMutex,
    key: String,
    token: LockToken,
    ttl: Duration,
    cancel: CancellationToken,
) -> WatchdogReport {
    let period = LeaseWatchdog::interval_for(ttl);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = WatchdogReport::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = mutex.extend(&key, &token, ttl) => res,
        };

        match result {
            Ok(true) => {
                report.renewals += 1;
                debug!(key = %key, renewals = report.renewals, "lease extended");
            }
            Ok(false) => {
                report.failures += 1;
                error!(key = %key, "lease lost: token no longer owns the key");
            }
            Err(e) => {
                report.failures += 1;
                warn!(key = %key, error = %e, "failed to extend lease");
            }
        }
    }

    debug!(key = %key, ?report, "lease watchdog stopped");
    report
}
