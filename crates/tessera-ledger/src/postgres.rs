//! PostgreSQL-backed deposit ledger

use async_trait::async_trait;
use tracing::{debug, info};

use tessera_db::{DbError, DepositRepo};
use tessera_types::{
    Amount, AssignmentEvent, Deposit, DepositHold, DepositId, DepositQuery, NewDeposit,
};

use crate::{require_positive, DepositLedger, LedgerError, Result};

/// Deposit ledger persisted through [`DepositRepo`]
pub struct PgDepositLedger {
    repo: DepositRepo,
}

impl PgDepositLedger {
    pub fn new(repo: DepositRepo) -> Self {
        Self { repo }
    }
}

fn to_amount(value: rust_decimal::Decimal) -> Result<Amount> {
    Amount::from_decimal(value).map_err(|e| LedgerError::Database {
        message: e.to_string(),
    })
}

fn not_found(deposit_id: DepositId) -> impl FnOnce(DbError) -> LedgerError {
    move |e| match e {
        DbError::NotFound(_) => LedgerError::NotFound { deposit_id },
        other => other.into(),
    }
}

#[async_trait]
impl DepositLedger for PgDepositLedger {
    async fn ingest(&self, deposit: NewDeposit) -> Result<Deposit> {
        let (row, inserted) = self.repo.insert_if_absent(&deposit).await?;
        if inserted {
            info!(deposit_id = row.id, amount = %row.amount, depositor = %row.depositor, "Deposit ingested");
        } else {
            debug!(transfer_uid = %row.transfer_uid, deposit_id = row.id, "Deposit already ingested");
        }
        Ok(Deposit::try_from(row)?)
    }

    async fn get(&self, deposit_id: DepositId) -> Result<Deposit> {
        let row = self
            .repo
            .find_by_id(deposit_id.0)
            .await?
            .ok_or(LedgerError::NotFound { deposit_id })?;
        Ok(Deposit::try_from(row)?)
    }

    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount> {
        let remaining = self
            .repo
            .remaining(deposit_id.0)
            .await?
            .ok_or(LedgerError::NotFound { deposit_id })?;
        to_amount(remaining)
    }

    async fn find_with_sufficient_remaining(
        &self,
        query: &DepositQuery,
        min_amount: Amount,
    ) -> Result<Option<Deposit>> {
        let row = self
            .repo
            .find_with_sufficient_free(
                query.depositor.as_str(),
                query.token.as_str(),
                query.chain_id,
                min_amount.as_decimal(),
            )
            .await?;
        Ok(row.map(Deposit::try_from).transpose()?)
    }

    async fn find_next_with_any_remaining(&self, query: &DepositQuery) -> Result<Option<Deposit>> {
        let row = self
            .repo
            .find_next_with_free(query.depositor.as_str(), query.token.as_str(), query.chain_id)
            .await?;
        Ok(row.map(Deposit::try_from).transpose()?)
    }

    async fn total_available(&self, query: &DepositQuery) -> Result<Amount> {
        let total = self
            .repo
            .total_free(query.depositor.as_str(), query.token.as_str(), query.chain_id)
            .await?;
        to_amount(total)
    }

    async fn assign(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        target_reference: &str,
    ) -> Result<AssignmentEvent> {
        require_positive(amount, "Assignment")?;
        let row = self
            .repo
            .assign(deposit_id.0, amount.as_decimal(), target_reference)
            .await
            .map_err(not_found(deposit_id))?;
        debug!(deposit_id = %deposit_id, amount = %amount, target_reference, "Deposit assigned");
        Ok(AssignmentEvent::try_from(row)?)
    }

    async fn assignments(&self, deposit_id: DepositId) -> Result<Vec<AssignmentEvent>> {
        // Distinguish an unknown deposit from one without assignments
        self.get(deposit_id).await?;
        let rows = self.repo.list_assignments(deposit_id.0).await?;
        rows.into_iter()
            .map(|r| AssignmentEvent::try_from(r).map_err(LedgerError::from))
            .collect()
    }

    async fn hold(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        reference: &str,
        target_reference: &str,
    ) -> Result<DepositHold> {
        require_positive(amount, "Hold")?;
        let row = self
            .repo
            .hold(deposit_id.0, amount.as_decimal(), reference, target_reference)
            .await
            .map_err(not_found(deposit_id))?;
        debug!(deposit_id = %deposit_id, amount = %amount, reference, "Deposit hold placed");
        Ok(DepositHold::try_from(row)?)
    }

    async fn settle_holds(&self, reference: &str) -> Result<Vec<AssignmentEvent>> {
        let rows = self.repo.settle_holds(reference).await?;
        if !rows.is_empty() {
            info!(reference, count = rows.len(), "Deposit holds settled");
        }
        rows.into_iter()
            .map(|r| AssignmentEvent::try_from(r).map_err(LedgerError::from))
            .collect()
    }

    async fn release_holds(&self, reference: &str) -> Result<u64> {
        let released = self.repo.release_holds(reference).await?;
        if released > 0 {
            debug!(reference, released, "Deposit holds released");
        }
        Ok(released)
    }

    async fn held_references(&self) -> Result<Vec<String>> {
        Ok(self.repo.held_references().await?)
    }
}
