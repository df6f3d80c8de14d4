//! Lease-based distributed mutex
//!
//! Each acquisition makes exactly one set-if-absent attempt. Retrying is
//! left to the caller, who picks between failing fast and polling.

use super::store::LockStore;
use crate::common::{validate_key, CoordMetrics, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Random value proving ownership of one acquisition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A successful acquisition
#[derive(Debug, Clone)]
pub struct LockLease {
    pub key: String,
    pub token: LockToken,
    pub ttl: Duration,
    pub acquired_at: Instant,
}

/// Result of a single acquisition attempt
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(LockLease),
    /// Someone else holds the key
    Contended,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }

    pub fn into_lease(self) -> Option<LockLease> {
        match self {
            AcquireOutcome::Acquired(lease) => Some(lease),
            AcquireOutcome::Contended => None,
        }
    }
}

/// Exclusive lock shared by every process talking to the same store
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn LockStore>,
    metrics: Arc<CoordMetrics>,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_metrics(store, Arc::new(CoordMetrics::new()))
    }

    pub fn with_metrics(store: Arc<dyn LockStore>, metrics: Arc<CoordMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn metrics(&self) -> &Arc<CoordMetrics> {
        &self.metrics
    }

    /// Try once to take `key` for `ttl`.
    ///
    /// Contention is `Ok(AcquireOutcome::Contended)`; only store failures
    /// and invalid arguments are errors.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<AcquireOutcome> {
        validate_key(key)?;
        let token = LockToken::generate();

        match self.store.set_if_absent(key, token.as_str(), ttl).await {
            Ok(true) => {
                self.metrics.locks_acquired.inc();
                tracing::debug!(key, ?ttl, "lock acquired");
                Ok(AcquireOutcome::Acquired(LockLease {
                    key: key.to_string(),
                    token,
                    ttl,
                    acquired_at: Instant::now(),
                }))
            }
            Ok(false) => {
                self.metrics.locks_contended.inc();
                tracing::debug!(key, "lock held elsewhere");
                Ok(AcquireOutcome::Contended)
            }
            Err(e) => {
                self.metrics.store_errors.inc();
                Err(e)
            }
        }
    }

    /// Reset the lease to `ttl` if `token` still owns `key`.
    ///
    /// `Ok(false)` means the lease is gone: it expired, or another holder
    /// now owns the key.
    pub async fn extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        match self.store.compare_and_extend(key, token.as_str(), ttl).await {
            Ok(true) => {
                self.metrics.leases_extended.inc();
                Ok(true)
            }
            Ok(false) => {
                self.metrics.lease_extend_failures.inc();
                Ok(false)
            }
            Err(e) => {
                self.metrics.lease_extend_failures.inc();
                self.metrics.store_errors.inc();
                Err(e)
            }
        }
    }

    /// Delete `key` if `token` still owns it. Safe to call more than once.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        match self.store.compare_and_delete(key, token.as_str()).await {
            Ok(true) => {
                self.metrics.locks_released.inc();
                tracing::debug!(key, "lock released");
                Ok(true)
            }
            Ok(false) => {
                self.metrics.lock_release_failures.inc();
                Ok(false)
            }
            Err(e) => {
                self.metrics.lock_release_failures.inc();
                self.metrics.store_errors.inc();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex").finish_non_exhaustive()
    }
}
