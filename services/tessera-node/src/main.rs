//! Tessera Node
//!
//! Runs the bundle sequencer on its timer, a periodic database health
//! check, and the HTTP submission surface. On Ctrl+C or SIGTERM the HTTP
//! surface stops first, then the sequencer bundles what is still queued.
//!
//! # Usage
//!
//! ```bash
//! # Local, everything in memory
//! tessera-node --dev
//!
//! # Against PostgreSQL and real endpoints
//! tessera-node --config /etc/tessera/node.toml
//!
//! # Environment overrides
//! TESSERA__SERVER__PORT=8080 TESSERA__SEQUENCER__INTERVAL_MS=5000 tessera-node
//! ```

mod config;
mod error;
mod node;
mod routes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tessera_db::Database;

use crate::config::{LoggingConfig, NodeConfig};
use crate::routes::AppState;

/// Tessera intention node
#[derive(Parser, Debug)]
#[command(name = "tessera-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file
    #[arg(short, long, env = "TESSERA_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "TESSERA_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "TESSERA_PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TESSERA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "TESSERA_LOG_FORMAT")]
    log_format: Option<String>,

    /// Run with in-memory stores and a simulated chain
    #[arg(long, env = "TESSERA_DEV")]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut node_config = NodeConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        node_config.server.host = host;
    }
    if let Some(port) = args.port {
        node_config.server.port = port;
    }
    if let Some(url) = args.database_url {
        node_config.database.postgres_url = url;
    }
    if let Some(level) = args.log_level {
        node_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        node_config.logging.format = format;
    }

    init_logging(&node_config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dev = args.dev,
        "Starting Tessera node"
    );

    if let Err(e) = node_config.validate(args.dev) {
        error!(class = %e.class(), error = %e, "Invalid configuration");
        return Err(e.into());
    }
    info!(config = %node_config.describe(), "Configuration loaded");

    let (db, parts) = if args.dev {
        (None, node::build_dev(&node_config).await?)
    } else {
        let db = init_database(&node_config).await?;
        let parts = node::build_postgres(&node_config, &db).await?;
        (Some(db), parts)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let db_healthy = Arc::new(AtomicBool::new(true));

    let sequencer_task = tokio::spawn(parts.sequencer.clone().run(shutdown_rx.clone()));
    let health_task = db.clone().map(|db| {
        tokio::spawn(health_loop(
            db,
            Duration::from_secs(node_config.health.interval_secs.max(1)),
            db_healthy.clone(),
            shutdown_rx.clone(),
        ))
    });

    let state = AppState {
        service: parts.service.clone(),
        sequencer: parts.sequencer.clone(),
        db: db.clone(),
        db_healthy,
    };
    let app = routes::router(state);

    let addr = node_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        host = %node_config.server.host,
        port = node_config.server.port,
        "Server listening"
    );

    let (http_stop_tx, http_stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Stop taking intentions before the sequencer bundles the last of them
    let _ = http_stop_tx.send(());
    match tokio::time::timeout(node_config.server.shutdown_timeout(), &mut server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
        Err(_) => {
            warn!("HTTP server did not stop in time, aborting open connections");
            server.abort();
        }
    }

    let _ = shutdown_tx.send(true);

    // The sequencer finishes its in-flight cycle and a final one before returning
    if let Err(e) = sequencer_task.await {
        error!(error = %e, "Sequencer task panicked");
    }
    if let Some(task) = health_task {
        let _ = task.await;
    }
    if !parts.sequencer.shutdown().await {
        warn!("Some archival or webhook work was abandoned");
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .init();
        }
    }
}

/// Connect with backoff, migrate and verify the pool
async fn init_database(config: &NodeConfig) -> anyhow::Result<Database> {
    info!("Connecting to database...");
    let db = Database::connect_with_retry(&config.database)
        .await
        .context("database unreachable")?;
    db.migrate().await?;

    let health = db.health_check().await?;
    if !health.healthy {
        anyhow::bail!("Database health check failed");
    }
    info!(postgres = health.postgres, "Database health check passed");
    Ok(db)
}

async fn health_loop(
    db: Database,
    period: Duration,
    healthy: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ok = db.health_check().await.map(|h| h.healthy).unwrap_or(false);
                let was = healthy.swap(ok, Ordering::SeqCst);
                if was && !ok {
                    warn!("Database health check failing");
                } else if !was && ok {
                    info!("Database health check recovered");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["tessera-node", "--dev", "--port", "8080"]);
        assert!(args.dev);
        assert_eq!(args.port, Some(8080));
        assert!(args.database_url.is_none());
    }
}
