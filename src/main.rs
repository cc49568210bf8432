use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeep::config::GatekeepConfig;
use gatekeep::http::HttpServer;
use gatekeep::ratelimit::RateLimiter;
use gatekeep::store::{CounterStore, MemoryStore, RedisStore};

/// HTTP admission control with per-IP and per-token rate limiting.
#[derive(Debug, Parser)]
#[command(name = "gatekeep", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address, overriding `server.listen_addr`
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeep");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeepConfig::load(Some(cli.config.as_path()))?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        ip_defaults = ?config.ip_defaults(),
        token_defaults = ?config.token_defaults(),
        ip_overrides = config.rate_limit.ips.len(),
        token_overrides = config.rate_limit.tokens.len(),
        "Configuration loaded"
    );

    match config.redis_addr.clone() {
        Some(addr) => {
            let store = Arc::new(RedisStore::connect(&addr).await?);
            info!(redis_addr = %addr, "Using Redis counter store");
            run(&config, store).await
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            info!("Using in-memory counter store");
            spawn_purge_task(store.clone(), Duration::from_secs(config.server.purge_interval_secs));
            run(&config, store).await
        }
    }
}

async fn run<S: CounterStore + 'static>(config: &GatekeepConfig, store: Arc<S>) -> anyhow::Result<()> {
    let rate_limiter = Arc::new(RateLimiter::new(store, config.policies()));
    info!("Rate limiter initialized");

    let upstream = Router::new().fallback(|| async { "Limites limitado - LIMITRATE" });
    let server = HttpServer::new(config.server.listen_addr, rate_limiter, upstream);

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Gatekeep stopped");
    Ok(())
}

/// Periodically drop expired counters from the in-memory store.
fn spawn_purge_task(store: Arc<MemoryStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                debug!(removed, "Purged expired counters");
            }
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
