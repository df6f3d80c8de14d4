//! Node server

use crate::common::{Config, CoordMetrics, Result};
use crate::idgen::IdAllocator;
use crate::jobs::PrecacheJob;
use crate::lock::{CoordinatedSection, DistributedMutex, LockStore};
use crate::node::http::{create_router, AppState};
use crate::schedule::{CronScheduler, Scheduler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// One coordkit node: id allocation over HTTP plus scheduled jobs
pub struct NodeServer {
    config: Config,
    mutex: DistributedMutex,
    precache: Option<Arc<PrecacheJob>>,
}

impl NodeServer {
    pub fn new(config: Config, store: Arc<dyn LockStore>) -> Self {
        let metrics = Arc::new(CoordMetrics::new());
        Self {
            config,
            mutex: DistributedMutex::with_metrics(store, metrics),
            precache: None,
        }
    }

    /// Lock handle sharing this node's store and metrics
    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }

    pub fn section(&self) -> CoordinatedSection {
        CoordinatedSection::new(self.mutex.clone())
    }

    pub fn metrics(&self) -> &Arc<CoordMetrics> {
        self.mutex.metrics()
    }

    /// Run `job` on `precache.cron` while the server is up
    pub fn with_precache(mut self, job: Arc<PrecacheJob>) -> Self {
        self.precache = Some(job);
        self
    }

    /// Serve on `listener` until `shutdown` fires, then stop scheduled jobs.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let metrics = self.metrics().clone();
        let allocator = IdAllocator::from_config(&self.config.id)?.with_metrics(metrics.clone());

        tracing::info!("Starting node: {}", self.config.node_id);
        tracing::info!("  Admin HTTP: {}", listener.local_addr()?);
        tracing::info!("  Machine id: {}", allocator.machine_id());
        tracing::info!("  Lease TTL: {:?}", self.config.lock.lease_ttl());

        let mut scheduler = CronScheduler::with_cancel(&shutdown);
        match self.precache {
            Some(job) if self.config.precache.enabled => {
                job.register(&mut scheduler)?;
                tracing::info!("  Pre-cache: {}", self.config.precache.cron);
            }
            Some(_) => tracing::info!("  Pre-cache: disabled"),
            None => tracing::info!("  Pre-cache: not configured"),
        }

        let router = create_router(AppState {
            node_id: self.config.node_id.clone(),
            allocator: Arc::new(allocator),
            metrics,
        });

        tracing::info!("✓ Node ready");
        let signal = shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        shutdown.cancel();
        scheduler.stop().await;
        tracing::info!("Node stopped");

        result.map_err(Into::into)
    }
}

/// Cancel `token` on Ctrl-C or, on unix, SIGTERM
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
