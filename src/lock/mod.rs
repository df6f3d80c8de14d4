//! Lease-based distributed locking
//!
//! - [`LockStore`]: the atomic operations required from the coordination store
//! - [`DistributedMutex`]: single-attempt acquire, token-checked extend/release
//! - [`LeaseWatchdog`]: background lease renewal at `ttl / 2`
//! - [`CoordinatedSection`]: acquire, renew, run a callback, release

pub mod memory;
pub mod mutex;
pub mod redis_store;
pub mod section;
pub mod store;
pub mod watchdog;

pub use memory::MemoryLockStore;
pub use mutex::{AcquireOutcome, DistributedMutex, LockLease, LockToken};
pub use redis_store::RedisLockStore;
pub use section::{CoordinatedSection, SectionOutcome};
pub use store::LockStore;
pub use watchdog::{LeaseWatchdog, WatchdogReport, MIN_LEASE_TTL};
