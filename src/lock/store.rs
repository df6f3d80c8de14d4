//! Coordination store contract
//!
//! The three atomic operations every backend must provide. Mutual exclusion
//! across processes rests entirely on their atomicity; nothing in this crate
//! substitutes a local lock for them.

use crate::common::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait LockStore: Send + Sync {
    /// `SET key value NX PX ttl`: write only when the key is absent.
    ///
    /// Returns `Ok(false)` when the key is already held.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only when it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset the expiry of `key` to `ttl` only when it currently holds `expected`.
    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;
}

/// Expiry in whole milliseconds, as the store protocol wants it
pub(crate) fn ttl_millis(ttl: Duration) -> Result<u64> {
    let millis = ttl.as_millis();
    if millis == 0 {
        return Err(Error::InvalidTtl(ttl));
    }
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(30)).unwrap(), 30_000);
        assert_eq!(ttl_millis(Duration::from_micros(1500)).unwrap(), 1);
        assert!(matches!(
            ttl_millis(Duration::from_micros(999)),
            Err(Error::InvalidTtl(_))
        ));
    }
}
