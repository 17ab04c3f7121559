use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use keylock::coordination::node::holder_id;
use keylock::coordination::redis::{create_pool, RedisStore};
use keylock::{config, DistributedLock, LockError, LockKey};

/// Exit status when the key is held by another caller.
const EXIT_CONFLICT: u8 = 2;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "keylock", about = "Inspect and exercise Redis-backed keyed locks")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/keylock/config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a key, hold it for a while, then release it.
    Hold {
        /// Lock key, without the configured namespace prefix.
        #[arg(short, long)]
        key: String,
        /// Record TTL in seconds (defaults to `lock.default_ttl_secs`).
        #[arg(long)]
        ttl: Option<u64>,
        /// How long to hold the key before releasing it.
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },
    /// Delete a key whatever it holds, e.g. after its holder crashed.
    Unlock {
        #[arg(short, long)]
        key: String,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn hold(
    lock: &DistributedLock,
    key: &LockKey,
    ttl: u64,
    hold_ms: u64,
) -> Result<ExitCode> {
    let result = lock
        .run_exclusive(key, ttl, || async {
            tracing::info!(%key, ttl, hold_ms, holder = holder_id(), "lock acquired");
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(hold_ms)) => {}
                () = shutdown_signal() => tracing::info!(%key, "interrupted; releasing early"),
            }
            Ok::<_, LockError>(())
        })
        .await;

    match result {
        Ok(()) => {
            tracing::info!(%key, "lock released");
            Ok(ExitCode::SUCCESS)
        }
        Err(LockError::Conflict { key }) => {
            tracing::warn!(%key, "lock is held by another caller");
            Ok(ExitCode::from(EXIT_CONFLICT))
        }
        Err(e) => Err(e).context("hold failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::debug!(config_path = %cli.config, "configuration loaded");

    let pool = create_pool(&config.redis).await?;
    let lock = DistributedLock::new(Arc::new(RedisStore::new(pool)), config.lock);

    match cli.command {
        Command::Hold { key, ttl, hold_ms } => {
            let key = LockKey::new(key)?;
            let ttl = ttl.unwrap_or(lock.config().default_ttl_secs);
            hold(&lock, &key, ttl, hold_ms).await
        }
        Command::Unlock { key } => {
            let key = LockKey::new(key)?;
            lock.force_release(&key).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
