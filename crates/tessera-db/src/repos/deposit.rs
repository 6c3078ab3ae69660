//! Deposit ledger repository
//!
//! Free value of a deposit is `amount - Σ assignments - Σ holds`. Every
//! read-modify-write locks the deposit row with `FOR UPDATE` so concurrent
//! allocations against one deposit serialize.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use tessera_types::NewDeposit;

use crate::models::to_bigint;
use crate::{DbAssignment, DbDeposit, DbError, DbHold, DbResult};

/// Deposit repository
pub struct DepositRepo {
    pool: PgPool,
}

impl DepositRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a deposit unless its transfer_uid is already known.
    ///
    /// Returns the stored row and whether this call inserted it.
    pub async fn insert_if_absent(&self, deposit: &NewDeposit) -> DbResult<(DbDeposit, bool)> {
        let inserted = sqlx::query_as::<_, DbDeposit>(
            r#"
            INSERT INTO deposits (tx_hash, transfer_uid, chain_id, depositor, token, amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transfer_uid) DO NOTHING
            RETURNING id, tx_hash, transfer_uid, chain_id, depositor, token, amount, assigned_at, created_at
            "#,
        )
        .bind(&deposit.tx_hash)
        .bind(&deposit.transfer_uid)
        .bind(to_bigint(deposit.chain_id, "chain_id")?)
        .bind(deposit.depositor.as_str())
        .bind(deposit.token.as_str())
        .bind(deposit.amount.as_decimal())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let existing = self
            .find_by_transfer_uid(&deposit.transfer_uid)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("deposit {}", deposit.transfer_uid)))?;
        Ok((existing, false))
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<DbDeposit>> {
        let deposit = sqlx::query_as::<_, DbDeposit>(
            r#"
            SELECT id, tx_hash, transfer_uid, chain_id, depositor, token, amount, assigned_at, created_at
            FROM deposits
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deposit)
    }

    pub async fn find_by_transfer_uid(&self, transfer_uid: &str) -> DbResult<Option<DbDeposit>> {
        let deposit = sqlx::query_as::<_, DbDeposit>(
            r#"
            SELECT id, tx_hash, transfer_uid, chain_id, depositor, token, amount, assigned_at, created_at
            FROM deposits
            WHERE transfer_uid = $1
            "#,
        )
        .bind(transfer_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deposit)
    }

    /// Amount minus assignments, ignoring holds. `None` if the deposit is unknown.
    pub async fn remaining(&self, id: i64) -> DbResult<Option<Decimal>> {
        let remaining = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT d.amount - COALESCE((SELECT SUM(a.amount) FROM deposit_assignments a WHERE a.deposit_id = d.id), 0)
            FROM deposits d
            WHERE d.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }

    // =========================================================================
    // Allocation queries
    // =========================================================================

    /// Oldest matching deposit whose free value covers `min_amount`
    pub async fn find_with_sufficient_free(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        min_amount: Decimal,
    ) -> DbResult<Option<DbDeposit>> {
        let deposit = sqlx::query_as::<_, DbDeposit>(
            r#"
            SELECT d.id, d.tx_hash, d.transfer_uid, d.chain_id, d.depositor, d.token, d.amount, d.assigned_at, d.created_at
            FROM deposits d
            WHERE d.depositor = $1 AND d.token = $2 AND d.chain_id = $3 AND d.assigned_at IS NULL
              AND d.amount
                  - COALESCE((SELECT SUM(a.amount) FROM deposit_assignments a WHERE a.deposit_id = d.id), 0)
                  - COALESCE((SELECT SUM(h.amount) FROM deposit_holds h WHERE h.deposit_id = d.id), 0)
                  >= $4
            ORDER BY d.id
            LIMIT 1
            "#,
        )
        .bind(depositor)
        .bind(token)
        .bind(to_bigint(chain_id, "chain_id")?)
        .bind(min_amount)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deposit)
    }

    /// Oldest matching deposit with any free value
    pub async fn find_next_with_free(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
    ) -> DbResult<Option<DbDeposit>> {
        let deposit = sqlx::query_as::<_, DbDeposit>(
            r#"
            SELECT d.id, d.tx_hash, d.transfer_uid, d.chain_id, d.depositor, d.token, d.amount, d.assigned_at, d.created_at
            FROM deposits d
            WHERE d.depositor = $1 AND d.token = $2 AND d.chain_id = $3 AND d.assigned_at IS NULL
              AND d.amount
                  - COALESCE((SELECT SUM(a.amount) FROM deposit_assignments a WHERE a.deposit_id = d.id), 0)
                  - COALESCE((SELECT SUM(h.amount) FROM deposit_holds h WHERE h.deposit_id = d.id), 0)
                  > 0
            ORDER BY d.id
            LIMIT 1
            "#,
        )
        .bind(depositor)
        .bind(token)
        .bind(to_bigint(chain_id, "chain_id")?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deposit)
    }

    /// Sum of free value across matching deposits
    pub async fn total_free(&self, depositor: &str, token: &str, chain_id: u64) -> DbResult<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(
                d.amount
                - COALESCE((SELECT SUM(a.amount) FROM deposit_assignments a WHERE a.deposit_id = d.id), 0)
                - COALESCE((SELECT SUM(h.amount) FROM deposit_holds h WHERE h.deposit_id = d.id), 0)
            ), 0)
            FROM deposits d
            WHERE d.depositor = $1 AND d.token = $2 AND d.chain_id = $3 AND d.assigned_at IS NULL
            "#,
        )
        .bind(depositor)
        .bind(token)
        .bind(to_bigint(chain_id, "chain_id")?)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    // =========================================================================
    // Allocation writes
    // =========================================================================

    /// Assign part or all of a deposit's free value
    pub async fn assign(
        &self,
        deposit_id: i64,
        amount: Decimal,
        target_reference: &str,
    ) -> DbResult<DbAssignment> {
        if amount <= Decimal::ZERO {
            return Err(DbError::InvalidInput(
                "Assignment amount must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let deposit = lock_deposit(&mut tx, deposit_id).await?;
        let remaining = deposit.amount - assigned_total(&mut tx, deposit_id).await?;
        let free = remaining - held_total(&mut tx, deposit_id).await?;

        if amount > free {
            return Err(DbError::InsufficientRemaining {
                deposit_id,
                available: free,
                requested: amount,
            });
        }

        let assignment = insert_assignment(&mut tx, deposit_id, amount, target_reference).await?;
        if remaining - amount == Decimal::ZERO {
            mark_assigned(&mut tx, deposit_id).await?;
        }

        tx.commit().await?;

        Ok(assignment)
    }

    /// Reserve part of a deposit's free value under `reference`
    pub async fn hold(
        &self,
        deposit_id: i64,
        amount: Decimal,
        reference: &str,
        target_reference: &str,
    ) -> DbResult<DbHold> {
        if amount <= Decimal::ZERO {
            return Err(DbError::InvalidInput("Hold amount must be positive".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let deposit = lock_deposit(&mut tx, deposit_id).await?;
        let free = deposit.amount
            - assigned_total(&mut tx, deposit_id).await?
            - held_total(&mut tx, deposit_id).await?;

        if amount > free {
            return Err(DbError::InsufficientRemaining {
                deposit_id,
                available: free,
                requested: amount,
            });
        }

        let hold = sqlx::query_as::<_, DbHold>(
            r#"
            INSERT INTO deposit_holds (id, deposit_id, amount, reference, target_reference)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, deposit_id, amount, reference, target_reference, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(deposit_id)
        .bind(amount)
        .bind(reference)
        .bind(target_reference)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(hold)
    }

    /// Convert every hold under `reference` into an assignment in one transaction
    pub async fn settle_holds(&self, reference: &str) -> DbResult<Vec<DbAssignment>> {
        let mut tx = self.pool.begin().await?;

        let holds = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT id, deposit_id, amount, reference, target_reference, created_at
            FROM deposit_holds
            WHERE reference = $1
            ORDER BY created_at, id
            FOR UPDATE
            "#,
        )
        .bind(reference)
        .fetch_all(&mut *tx)
        .await?;

        if holds.is_empty() {
            return Ok(Vec::new());
        }

        // Lock deposits in id order to avoid deadlocks with other settlements
        let mut deposit_ids: Vec<i64> = holds.iter().map(|h| h.deposit_id).collect();
        deposit_ids.sort_unstable();
        deposit_ids.dedup();
        let mut amounts = std::collections::HashMap::new();
        for id in &deposit_ids {
            let deposit = lock_deposit(&mut tx, *id).await?;
            amounts.insert(*id, deposit.amount);
        }

        let mut assignments = Vec::with_capacity(holds.len());
        for hold in &holds {
            let amount = amounts
                .get(&hold.deposit_id)
                .copied()
                .ok_or_else(|| DbError::NotFound(format!("deposit {}", hold.deposit_id)))?;
            let remaining = amount - assigned_total(&mut tx, hold.deposit_id).await?;
            if hold.amount > remaining {
                return Err(DbError::InsufficientRemaining {
                    deposit_id: hold.deposit_id,
                    available: remaining,
                    requested: hold.amount,
                });
            }

            let assignment =
                insert_assignment(&mut tx, hold.deposit_id, hold.amount, &hold.target_reference)
                    .await?;
            if remaining - hold.amount == Decimal::ZERO {
                mark_assigned(&mut tx, hold.deposit_id).await?;
            }
            assignments.push(assignment);
        }

        sqlx::query("DELETE FROM deposit_holds WHERE reference = $1")
            .bind(reference)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(assignments)
    }

    /// Drop every hold under `reference`, returning how many were removed
    pub async fn release_holds(&self, reference: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM deposit_holds WHERE reference = $1")
            .bind(reference)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Distinct references of outstanding holds
    pub async fn held_references(&self) -> DbResult<Vec<String>> {
        let references = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT reference FROM deposit_holds ORDER BY reference",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(references)
    }

    pub async fn list_assignments(&self, deposit_id: i64) -> DbResult<Vec<DbAssignment>> {
        let assignments = sqlx::query_as::<_, DbAssignment>(
            r#"
            SELECT id, deposit_id, amount, target_reference, created_at
            FROM deposit_assignments
            WHERE deposit_id = $1
            ORDER BY id
            "#,
        )
        .bind(deposit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assignments)
    }

    pub async fn list_holds(&self, reference: &str) -> DbResult<Vec<DbHold>> {
        let holds = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT id, deposit_id, amount, reference, target_reference, created_at
            FROM deposit_holds
            WHERE reference = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        Ok(holds)
    }
}

// =============================================================================
// Transaction helpers
// =============================================================================

async fn lock_deposit(conn: &mut PgConnection, deposit_id: i64) -> DbResult<DbDeposit> {
    sqlx::query_as::<_, DbDeposit>(
        r#"
        SELECT id, tx_hash, transfer_uid, chain_id, depositor, token, amount, assigned_at, created_at
        FROM deposits
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(deposit_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::NotFound(format!("deposit {}", deposit_id)))
}

async fn assigned_total(conn: &mut PgConnection, deposit_id: i64) -> DbResult<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM deposit_assignments WHERE deposit_id = $1",
    )
    .bind(deposit_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

async fn held_total(conn: &mut PgConnection, deposit_id: i64) -> DbResult<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM deposit_holds WHERE deposit_id = $1",
    )
    .bind(deposit_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

async fn insert_assignment(
    conn: &mut PgConnection,
    deposit_id: i64,
    amount: Decimal,
    target_reference: &str,
) -> DbResult<DbAssignment> {
    let assignment = sqlx::query_as::<_, DbAssignment>(
        r#"
        INSERT INTO deposit_assignments (deposit_id, amount, target_reference)
        VALUES ($1, $2, $3)
        RETURNING id, deposit_id, amount, target_reference, created_at
        "#,
    )
    .bind(deposit_id)
    .bind(amount)
    .bind(target_reference)
    .fetch_one(&mut *conn)
    .await?;
    Ok(assignment)
}

async fn mark_assigned(conn: &mut PgConnection, deposit_id: i64) -> DbResult<()> {
    sqlx::query("UPDATE deposits SET assigned_at = NOW() WHERE id = $1 AND assigned_at IS NULL")
        .bind(deposit_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
