//! Bundle repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tessera_types::{ArchivalStatus, ArchivalUpdate, NewBundle};

use crate::models::to_bigint;
use crate::{DbBundle, DbError, DbResult};

const BUNDLE_COLUMNS: &str = "id, nonce, payload, proposer, signature, content_id, anchor_tx_hash, \
    archival_status, archival_tx_hash, archival_piece_id, archival_confirmed_at, archival_error, holds_settled_at, created_at";

/// Bundle repository
pub struct BundleRepo {
    pool: PgPool,
}

impl BundleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Highest persisted nonce, if any
    pub async fn last_nonce(&self) -> DbResult<Option<i64>> {
        let nonce = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(nonce) FROM bundles")
            .fetch_one(&self.pool)
            .await?;

        Ok(nonce)
    }

    /// Persist a bundle. A taken nonce surfaces as `Duplicate`.
    pub async fn insert(&self, bundle: &NewBundle) -> DbResult<DbBundle> {
        let sql = format!(
            r#"
            INSERT INTO bundles (nonce, payload, proposer, signature, archival_status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            BUNDLE_COLUMNS
        );

        let result = sqlx::query_as::<_, DbBundle>(&sql)
            .bind(to_bigint(bundle.nonce, "nonce")?)
            .bind(&bundle.payload)
            .bind(bundle.proposer.as_str())
            .bind(&bundle.signature)
            .bind(ArchivalStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::Duplicate(format!("bundle nonce {}", bundle.nonce)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_nonce(&self, nonce: u64) -> DbResult<Option<DbBundle>> {
        let sql = format!("SELECT {} FROM bundles WHERE nonce = $1", BUNDLE_COLUMNS);
        let bundle = sqlx::query_as::<_, DbBundle>(&sql)
            .bind(to_bigint(nonce, "nonce")?)
            .fetch_optional(&self.pool)
            .await?;

        Ok(bundle)
    }

    /// Newest first
    pub async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<DbBundle>> {
        let sql = format!(
            "SELECT {} FROM bundles ORDER BY nonce DESC LIMIT $1 OFFSET $2",
            BUNDLE_COLUMNS
        );
        let bundles = sqlx::query_as::<_, DbBundle>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(bundles)
    }

    /// Bundles missing a content id or anchor tx hash, oldest nonce first
    pub async fn list_unpublished(&self, limit: i64) -> DbResult<Vec<DbBundle>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM bundles
            WHERE content_id IS NULL OR anchor_tx_hash IS NULL
            ORDER BY nonce
            LIMIT $1
            "#,
            BUNDLE_COLUMNS
        );
        let bundles = sqlx::query_as::<_, DbBundle>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(bundles)
    }

    /// Bundles whose deposit holds are not yet settled, oldest nonce first
    pub async fn list_unsettled(&self, limit: i64) -> DbResult<Vec<DbBundle>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM bundles
            WHERE holds_settled_at IS NULL
            ORDER BY nonce
            LIMIT $1
            "#,
            BUNDLE_COLUMNS
        );
        let bundles = sqlx::query_as::<_, DbBundle>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(bundles)
    }

    pub async fn set_holds_settled(&self, nonce: u64, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE bundles SET holds_settled_at = $2 WHERE nonce = $1 AND holds_settled_at IS NULL",
        )
        .bind(to_bigint(nonce, "nonce")?)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.find_by_nonce(nonce).await?.is_none() {
            return Err(DbError::NotFound(format!("bundle nonce {}", nonce)));
        }
        Ok(())
    }

    pub async fn set_content_id(&self, nonce: u64, content_id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE bundles SET content_id = $2 WHERE nonce = $1")
            .bind(to_bigint(nonce, "nonce")?)
            .bind(content_id)
            .execute(&self.pool)
            .await?;

        expect_row(result.rows_affected(), nonce)
    }

    pub async fn set_anchor_tx(&self, nonce: u64, tx_hash: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE bundles SET anchor_tx_hash = $2 WHERE nonce = $1")
            .bind(to_bigint(nonce, "nonce")?)
            .bind(tx_hash)
            .execute(&self.pool)
            .await?;

        expect_row(result.rows_affected(), nonce)
    }

    /// Apply an archival transition. A confirmed bundle never moves back to failed.
    pub async fn update_archival(&self, nonce: u64, update: &ArchivalUpdate) -> DbResult<()> {
        let nonce_param = to_bigint(nonce, "nonce")?;
        let query = match update {
            ArchivalUpdate::Uploading => sqlx::query(
                "UPDATE bundles SET archival_status = 'uploading', archival_error = NULL WHERE nonce = $1 AND archival_status <> 'confirmed'",
            )
            .bind(nonce_param),
            ArchivalUpdate::TxSubmitted { tx_hash } => {
                sqlx::query("UPDATE bundles SET archival_tx_hash = $2 WHERE nonce = $1")
                    .bind(nonce_param)
                    .bind(tx_hash.clone())
            }
            ArchivalUpdate::Completed { piece_id } => {
                sqlx::query("UPDATE bundles SET archival_piece_id = $2 WHERE nonce = $1")
                    .bind(nonce_param)
                    .bind(piece_id.clone())
            }
            ArchivalUpdate::Confirmed { at } => sqlx::query(
                "UPDATE bundles SET archival_status = 'confirmed', archival_confirmed_at = $2, archival_error = NULL WHERE nonce = $1",
            )
            .bind(nonce_param)
            .bind(*at),
            ArchivalUpdate::Failed { error } => sqlx::query(
                "UPDATE bundles SET archival_status = 'failed', archival_error = $2 WHERE nonce = $1 AND archival_status <> 'confirmed'",
            )
            .bind(nonce_param)
            .bind(error.clone()),
        };

        query.execute(&self.pool).await?;
        Ok(())
    }
}

fn expect_row(rows: u64, nonce: u64) -> DbResult<()> {
    if rows == 0 {
        return Err(DbError::NotFound(format!("bundle nonce {}", nonce)));
    }
    Ok(())
}
