//! Tessera Database Layer
//!
//! PostgreSQL persistence for the settlement core.
//!
//! # Tables
//!
//! - **deposits / deposit_assignments / deposit_holds**: the deposit ledger
//! - **vaults**: local mirror of on-chain vaults and their controllers
//! - **bundles**: nonce-ordered bundles with publish and archival state
//!
//! # Repository Pattern
//!
//! Each table group has its own repository. Every method acquires and
//! releases its own connection or transaction, so no caller ever holds a
//! pooled connection across a network call to another system.

pub mod config;
pub mod error;
pub mod models;
pub mod repos;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

pub use config::{mask_url, DatabaseConfig};
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
}

impl Database {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        Ok(Self { pg })
    }

    /// Connect, retrying with exponential backoff up to `connect_attempts` times
    pub async fn connect_with_retry(config: &DatabaseConfig) -> DbResult<Self> {
        let attempts = config.connect_attempts.max(1);
        let mut delay = Duration::from_millis(config.connect_backoff_ms);
        let mut attempt = 1;

        loop {
            match Self::connect(config).await {
                Ok(db) => return Ok(db),
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> DbResult<HealthStatus> {
        let pg_ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();

        Ok(HealthStatus {
            postgres: pg_ok,
            healthy: pg_ok,
        })
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.pg.close().await;
        info!("Database pool closed");
    }

    /// Create repository instances
    pub fn deposit_repo(&self) -> DepositRepo {
        DepositRepo::new(self.pg.clone())
    }

    pub fn vault_repo(&self) -> VaultRepo {
        VaultRepo::new(self.pg.clone())
    }

    pub fn bundle_repo(&self) -> BundleRepo {
        BundleRepo::new(self.pg.clone())
    }
}

/// Health status of the database connection
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub postgres: bool,
    pub healthy: bool,
}
