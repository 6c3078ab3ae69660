//! Tessera Deposit Ledger
//!
//! Append-only record of on-chain deposits and of how much of each has been
//! allocated to vaults.
//!
//! # Invariants
//!
//! 1. `amount == remaining + Σ assignments` for every deposit
//! 2. `remaining` never goes negative; an assignment is all-or-nothing
//! 3. `assigned_at` is set exactly when `remaining` reaches zero
//! 4. Ingestion is idempotent on `transfer_uid`
//!
//! Holds reserve value between matching an intention and bundling it.
//! Selection queries and `assign` only see *free* value
//! (`remaining - Σ holds`).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use tessera_db::DbError;
use tessera_types::{
    Amount, AssignmentEvent, Deposit, DepositHold, DepositId, DepositQuery, ErrorClass,
    NewDeposit,
};

pub use memory::InMemoryDepositLedger;
pub use postgres::PgDepositLedger;

/// Errors that can occur in ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Deposit not found: {deposit_id}")]
    NotFound { deposit_id: DepositId },

    #[error("Insufficient remaining on deposit {deposit_id}: available {available}, requested {requested}")]
    InsufficientRemaining {
        deposit_id: DepositId,
        available: Amount,
        requested: Amount,
    },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } | Self::InvalidAmount { .. } => ErrorClass::Validation,
            Self::InsufficientRemaining { .. } => ErrorClass::Business,
            Self::Database { .. } => ErrorClass::Transient,
        }
    }
}

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InsufficientRemaining {
                deposit_id,
                available,
                requested,
            } => LedgerError::InsufficientRemaining {
                deposit_id: DepositId(deposit_id),
                available: Amount::from_decimal(available).unwrap_or_default(),
                requested: Amount::from_decimal(requested).unwrap_or_default(),
            },
            DbError::InvalidInput(message) => LedgerError::InvalidAmount { message },
            other => LedgerError::Database {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Deposit ledger capability
///
/// Implementations must serialize concurrent writes per deposit so that the
/// sum of assignments and holds never exceeds the deposit amount.
#[async_trait]
pub trait DepositLedger: Send + Sync {
    /// Insert unless `transfer_uid` is known; a duplicate returns the existing row
    async fn ingest(&self, deposit: NewDeposit) -> Result<Deposit>;

    async fn get(&self, deposit_id: DepositId) -> Result<Deposit>;

    /// Amount minus assignments. Holds are not subtracted.
    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount>;

    /// Oldest matching deposit whose free value is at least `min_amount`
    async fn find_with_sufficient_remaining(
        &self,
        query: &DepositQuery,
        min_amount: Amount,
    ) -> Result<Option<Deposit>>;

    /// Oldest matching deposit with any free value
    async fn find_next_with_any_remaining(&self, query: &DepositQuery) -> Result<Option<Deposit>>;

    /// Sum of free value over matching deposits
    async fn total_available(&self, query: &DepositQuery) -> Result<Amount>;

    /// Atomically consume `amount` of a deposit's free value
    async fn assign(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        target_reference: &str,
    ) -> Result<AssignmentEvent>;

    async fn assignments(&self, deposit_id: DepositId) -> Result<Vec<AssignmentEvent>>;

    /// Reserve `amount` of a deposit's free value under `reference`
    async fn hold(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        reference: &str,
        target_reference: &str,
    ) -> Result<DepositHold>;

    /// Turn every hold under `reference` into an assignment, atomically
    async fn settle_holds(&self, reference: &str) -> Result<Vec<AssignmentEvent>>;

    /// Drop every hold under `reference`
    async fn release_holds(&self, reference: &str) -> Result<u64>;

    /// Distinct references that still have outstanding holds
    async fn held_references(&self) -> Result<Vec<String>>;
}

pub(crate) fn require_positive(amount: Amount, what: &str) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount {
            message: format!("{} amount must be greater than zero", what),
        });
    }
    Ok(())
}
