//! Database models - mapped from PostgreSQL tables

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use tessera_types::{
    Address, Amount, ArchivalStatus, AssignmentEvent, Bundle, Deposit, DepositHold, DepositId,
    HoldId, Vault, VaultId,
};

use crate::{DbError, DbResult};

// ============================================================================
// Deposit Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbDeposit {
    pub id: i64,
    pub tx_hash: String,
    pub transfer_uid: String,
    pub chain_id: i64,
    pub depositor: String,
    pub token: String,
    pub amount: Decimal,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbDeposit> for Deposit {
    type Error = DbError;

    fn try_from(row: DbDeposit) -> DbResult<Self> {
        Ok(Deposit {
            id: DepositId(row.id),
            tx_hash: row.tx_hash,
            transfer_uid: row.transfer_uid,
            chain_id: u64::try_from(row.chain_id)
                .map_err(|_| DbError::Serialization(format!("chain_id {}", row.chain_id)))?,
            depositor: Address::parse(&row.depositor)?,
            token: Address::parse(&row.token)?,
            amount: Amount::from_decimal(row.amount)?,
            assigned_at: row.assigned_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbAssignment {
    pub id: i64,
    pub deposit_id: i64,
    pub amount: Decimal,
    pub target_reference: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAssignment> for AssignmentEvent {
    type Error = DbError;

    fn try_from(row: DbAssignment) -> DbResult<Self> {
        Ok(AssignmentEvent {
            deposit_id: DepositId(row.deposit_id),
            amount: Amount::from_decimal(row.amount)?,
            target_reference: row.target_reference,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbHold {
    pub id: Uuid,
    pub deposit_id: i64,
    pub amount: Decimal,
    pub reference: String,
    pub target_reference: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbHold> for DepositHold {
    type Error = DbError;

    fn try_from(row: DbHold) -> DbResult<Self> {
        Ok(DepositHold {
            id: HoldId(row.id),
            deposit_id: DepositId(row.deposit_id),
            amount: Amount::from_decimal(row.amount)?,
            reference: row.reference,
            target_reference: row.target_reference,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Vault Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbVault {
    pub vault_id: i64,
    pub controllers: Vec<String>,
    pub rules: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbVault> for Vault {
    type Error = DbError;

    fn try_from(row: DbVault) -> DbResult<Self> {
        let controllers = row
            .controllers
            .iter()
            .map(|c| Address::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Vault {
            vault_id: VaultId(
                u64::try_from(row.vault_id)
                    .map_err(|_| DbError::Serialization(format!("vault_id {}", row.vault_id)))?,
            ),
            controllers,
            rules: row.rules,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Bundle Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbBundle {
    pub id: i64,
    pub nonce: i64,
    pub payload: String,
    pub proposer: String,
    pub signature: String,
    pub content_id: Option<String>,
    pub anchor_tx_hash: Option<String>,
    pub archival_status: String,
    pub archival_tx_hash: Option<String>,
    pub archival_piece_id: Option<String>,
    pub archival_confirmed_at: Option<DateTime<Utc>>,
    pub archival_error: Option<String>,
    pub holds_settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbBundle> for Bundle {
    type Error = DbError;

    fn try_from(row: DbBundle) -> DbResult<Self> {
        Ok(Bundle {
            id: row.id,
            nonce: u64::try_from(row.nonce)
                .map_err(|_| DbError::Serialization(format!("nonce {}", row.nonce)))?,
            payload: row.payload,
            proposer: Address::parse(&row.proposer)?,
            signature: row.signature,
            content_id: row.content_id,
            anchor_tx_hash: row.anchor_tx_hash,
            archival_status: ArchivalStatus::parse(&row.archival_status)?,
            archival_tx_hash: row.archival_tx_hash,
            archival_piece_id: row.archival_piece_id,
            archival_confirmed_at: row.archival_confirmed_at,
            archival_error: row.archival_error,
            holds_settled_at: row.holds_settled_at,
            created_at: row.created_at,
        })
    }
}

/// Convert an unsigned domain integer into a BIGINT bind value
pub(crate) fn to_bigint(value: u64, what: &str) -> DbResult<i64> {
    i64::try_from(value).map_err(|_| DbError::InvalidInput(format!("{} {} out of range", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_row_conversion() {
        let row = DbDeposit {
            id: 7,
            tx_hash: "0xabc".to_string(),
            transfer_uid: "0xabc:0".to_string(),
            chain_id: 1,
            depositor: "0xAbCdEf0000000000000000000000000000000001".to_string(),
            token: "0x0000000000000000000000000000000000000000".to_string(),
            amount: Decimal::new(700, 0),
            assigned_at: None,
            created_at: Utc::now(),
        };
        let deposit = Deposit::try_from(row).unwrap();
        assert_eq!(deposit.id, DepositId(7));
        assert_eq!(
            deposit.depositor.as_str(),
            "0xabcdef0000000000000000000000000000000001"
        );
        assert!(deposit.token.is_zero());
    }

    #[test]
    fn test_bundle_row_rejects_unknown_status() {
        let row = DbBundle {
            id: 1,
            nonce: 1,
            payload: "{}".to_string(),
            proposer: "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_string(),
            signature: "0x".to_string(),
            content_id: None,
            anchor_tx_hash: None,
            archival_status: "lost".to_string(),
            archival_tx_hash: None,
            archival_piece_id: None,
            archival_confirmed_at: None,
            archival_error: None,
            holds_settled_at: None,
            created_at: Utc::now(),
        };
        assert!(Bundle::try_from(row).is_err());
    }

    #[test]
    fn test_to_bigint_range() {
        assert_eq!(to_bigint(5, "nonce").unwrap(), 5);
        assert!(to_bigint(u64::MAX, "nonce").is_err());
    }
}
