//! Job scheduling
//!
//! The pre-cache job is triggered through [`Scheduler`]; each trigger is one
//! coordinated section attempt. [`CronScheduler`] is the tokio-based
//! implementation used by the node binary and the tests.

pub mod cron;

pub use self::cron::CronScheduler;

use crate::common::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A scheduled job. The token fires when the scheduler stops.
pub type Job = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Scheduler: Send {
    /// Register `job` to run on every occurrence of `expr`.
    fn schedule(&mut self, expr: &str, job: Job) -> Result<()>;

    /// Stop triggering jobs and wait for in-flight runs to finish.
    async fn stop(&mut self);
}
