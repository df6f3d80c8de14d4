//! Common utilities and types shared across coordkit

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{
    Config, HttpConfig, IdConfig, JoinConfig, LockConfig, PrecacheConfig, StoreConfig,
    DEFAULT_EPOCH_MS, MAX_MACHINE_ID,
};
pub use error::{Error, Result};
pub use metrics::{CoordMetrics, Counter, Gauge, Histogram};
pub use utils::{parse_duration, retry_with_backoff, timestamp_now_millis, validate_key};
