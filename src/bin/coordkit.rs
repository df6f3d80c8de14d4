//! coordkit node and tooling binary

use clap::{Parser, Subcommand};
use coordkit::common::{parse_duration, Config, Error};
use coordkit::idgen::IdAllocator;
use coordkit::lock::{
    CoordinatedSection, DistributedMutex, RedisLockStore, SectionOutcome, MIN_LEASE_TTL,
};
use coordkit::node::{shutdown_signal, NodeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordkit")]
#[command(about = "Distributed id allocation and lease-based locking")]
#[command(version)]
struct Cli {
    /// Config file (TOML); COORDKIT__* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node with the admin HTTP server
    Serve {
        /// Bind address for admin HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Machine id for the id allocator (0-1023)
        #[arg(long)]
        machine_id: Option<i64>,

        /// Redis URL for the coordination store
        #[arg(long)]
        redis_url: Option<String>,
    },

    /// Mint ids locally and print their fields
    Id {
        #[arg(long, default_value = "0")]
        machine_id: i64,

        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Hold a lock for a while, renewing the lease in the background
    Hold {
        /// Lock key
        #[arg(long)]
        key: String,

        /// Lease TTL (e.g. 30s)
        #[arg(long, default_value = "30s", value_parser = parse_duration_arg)]
        ttl: Duration,

        /// How long to keep the lock (e.g. 2m)
        #[arg(long, default_value = "60s", value_parser = parse_duration_arg)]
        hold: Duration,

        /// Poll until the lock is free instead of giving up
        #[arg(long)]
        wait: bool,

        /// Redis URL for the coordination store
        #[arg(long)]
        redis_url: Option<String>,
    },
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            machine_id,
            redis_url,
        } => {
            // CLI flags take priority over the file and environment
            if let Some(bind) = bind {
                config.http.bind_addr = bind;
            }
            if let Some(machine_id) = machine_id {
                config.id.machine_id = machine_id;
            }
            if let Some(url) = redis_url {
                config.store.redis_url = url;
            }
            config.validate()?;

            let store = RedisLockStore::connect(&config.store).await?;
            let listener = tokio::net::TcpListener::bind(config.http.bind_addr).await?;

            let shutdown = CancellationToken::new();
            tokio::spawn(shutdown_signal(shutdown.clone()));

            NodeServer::new(config, Arc::new(store))
                .serve(listener, shutdown)
                .await?;
        }
        Commands::Id { machine_id, count } => {
            config.id.machine_id = machine_id;
            let allocator = IdAllocator::from_config(&config.id)?;
            for _ in 0..count {
                let id = allocator.generate();
                let parts = allocator.decompose(id);
                println!(
                    "{}\ttimestamp_ms={}\tmachine_id={}\tsequence={}",
                    id, parts.timestamp_ms, parts.machine_id, parts.sequence
                );
            }
        }
        Commands::Hold {
            key,
            ttl,
            hold,
            wait,
            redis_url,
        } => {
            if let Some(url) = redis_url {
                config.store.redis_url = url;
            }
            config.validate()?;
            if ttl < MIN_LEASE_TTL {
                anyhow::bail!("--ttl must be at least {:?}", MIN_LEASE_TTL);
            }
            let store = RedisLockStore::connect(&config.store).await?;
            let section = CoordinatedSection::new(DistributedMutex::new(Arc::new(store)));

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));

            hold_lock(&section, &key, ttl, hold, wait, &cancel).await?;
        }
    }

    Ok(())
}

async fn hold_lock(
    section: &CoordinatedSection,
    key: &str,
    ttl: Duration,
    hold: Duration,
    wait: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let outcome = section
            .run_with_cancel(key, ttl, cancel, |token| async move {
                tracing::info!("Holding '{}' for {:?} (ttl {:?})", key, hold, ttl);
                tokio::select! {
                    _ = tokio::time::sleep(hold) => Ok(()),
                    _ = token.cancelled() => Err(Error::Cancelled),
                }
            })
            .await;

        match outcome {
            Ok(SectionOutcome::Completed(())) => {
                println!("held '{}' for {:?} and released it", key, hold);
                return Ok(());
            }
            Ok(SectionOutcome::Contended) if wait => {
                tokio::select! {
                    _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
            }
            Ok(SectionOutcome::Contended) => {
                println!("'{}' is held by another process", key);
                return Ok(());
            }
            Err(Error::Cancelled) => {
                println!("interrupted, released '{}'", key);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}
