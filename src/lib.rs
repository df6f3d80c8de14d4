//! # coordkit
//!
//! Coordination primitives for horizontally scaled service nodes:
//! - Time-ordered 64-bit ids minted locally, unique across up to 1024 machines
//! - Lease-based distributed locks on a shared key-value store (Redis)
//! - Coordinated sections that keep the lease alive while a callback runs
//! - Cron-scheduled cluster singletons built on top of them
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Node A     │   │   Node B     │   │   Node C     │
//! │ IdAllocator  │   │ IdAllocator  │   │ IdAllocator  │
//! │ (machine 1)  │   │ (machine 2)  │   │ (machine 3)  │
//! │  Sections    │   │  Sections    │   │  Sections    │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ SET NX PX / CAS  │                  │
//!        └─────────┬────────┴──────────────────┘
//!            ┌─────▼──────┐
//!            │   Redis    │
//!            └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! coordkit serve --machine-id 1 --bind 0.0.0.0:8080 --redis-url redis://127.0.0.1/
//! ```
//!
//! ### Mint ids offline
//! ```bash
//! coordkit id --machine-id 1 --count 5
//! ```
//!
//! ### Hold a lock
//! ```bash
//! coordkit hold --key save:team:join:lock --ttl 30s --hold 2m --wait
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod idgen;
pub mod jobs;
pub mod lock;
pub mod node;
pub mod schedule;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use idgen::IdAllocator;
pub use lock::{CoordinatedSection, DistributedMutex, LockStore, SectionOutcome};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
