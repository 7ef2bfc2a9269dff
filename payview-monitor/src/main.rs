//! payview-monitor - View Monitoring & Budget Reconciliation Service
//!
//! Polls submission view counts on per-tier timers, reconciles each change
//! into campaign budgets and creator earnings, and serves monitoring stats,
//! manual refresh and an SSE event stream over HTTP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use payview_common::config::{self, DEFAULT_BIND_ADDR};
use payview_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payview_monitor::fetcher::HttpViewFetcher;
use payview_monitor::scheduler::TaskRunner;
use payview_monitor::Monitor;

/// Command-line arguments for payview-monitor
#[derive(Parser, Debug)]
#[command(name = "payview-monitor")]
#[command(about = "View monitoring and budget reconciliation service")]
#[command(version)]
struct Args {
    /// TOML config file (falls back to PAYVIEW_CONFIG, then the OS default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (falls back to PAYVIEW_DATABASE, then config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long, env = "PAYVIEW_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = config::resolve_config_path(args.config.as_deref());
    let toml_config = config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    let level = &toml_config.logging.level;
                    format!("payview_monitor={level},payview_common={level},tower_http=info").into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting payview-monitor");
    info!(
        "Version: {} ({}, built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if config_path.exists() {
        info!("Config: {}", config_path.display());
    } else {
        warn!("Config file {} not found, using defaults", config_path.display());
    }

    let db_path = config::resolve_database_path(args.database.as_deref(), &toml_config);
    info!("Database: {}", db_path.display());
    let pool = payview_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(256);

    let fetcher = HttpViewFetcher::new(
        &toml_config.fetcher,
        Duration::from_secs(toml_config.refresh.fetch_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("Failed to create view fetcher: {}", e))?;
    info!("View gateway: {}", toml_config.fetcher.base_url);

    let monitor = Monitor::new(pool, &toml_config, Arc::new(fetcher), event_bus);

    let runner = TaskRunner::new();
    monitor.register_tasks(&runner);
    info!(
        hot = toml_config.cadence.hot_minutes,
        warm = toml_config.cadence.warm_minutes,
        cold = toml_config.cadence.cold_minutes,
        archived = toml_config.cadence.archived_minutes,
        quota = toml_config.rate_limit.requests_per_window,
        "Tier timers started"
    );

    let app = payview_monitor::build_router(monitor.app_state());

    let bind_addr = args
        .bind
        .or_else(|| toml_config.bind_addr.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    runner.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
