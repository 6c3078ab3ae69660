//! Deposit ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, DepositId, HoldId};

/// A deposit discovered on-chain, before it has a storage id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeposit {
    pub tx_hash: String,
    /// Unique per on-chain transfer; makes ingestion idempotent
    pub transfer_uid: String,
    pub chain_id: u64,
    pub depositor: Address,
    /// Zero address for the native asset
    pub token: Address,
    pub amount: Amount,
}

/// An ingested deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub tx_hash: String,
    pub transfer_uid: String,
    pub chain_id: u64,
    pub depositor: Address,
    pub token: Address,
    pub amount: Amount,
    /// Set exactly when the remaining balance reaches zero
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    pub fn is_fully_assigned(&self) -> bool {
        self.assigned_at.is_some()
    }
}

/// Selection key for allocation queries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositQuery {
    pub depositor: Address,
    pub token: Address,
    pub chain_id: u64,
}

impl DepositQuery {
    pub fn new(depositor: Address, token: Address, chain_id: u64) -> Self {
        Self {
            depositor,
            token,
            chain_id,
        }
    }

    pub fn matches(&self, deposit: &Deposit) -> bool {
        deposit.depositor == self.depositor
            && deposit.token == self.token
            && deposit.chain_id == self.chain_id
    }
}

/// An allocation of part or all of a deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub deposit_id: DepositId,
    pub amount: Amount,
    pub target_reference: String,
    pub created_at: DateTime<Utc>,
}

/// A reservation on a deposit that has been matched but not yet committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositHold {
    pub id: HoldId,
    pub deposit_id: DepositId,
    pub amount: Amount,
    /// Groups the holds of one intention
    pub reference: String,
    /// Becomes the assignment's target reference on settlement
    pub target_reference: String,
    pub created_at: DateTime<Utc>,
}

/// Inclusive block range for deposit discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl BlockRange {
    pub fn latest() -> Self {
        Self {
            from_block: None,
            to_block: None,
        }
    }

    /// Clamp the range to at most `max_blocks` blocks, keeping the upper end
    pub fn bounded(self, max_blocks: u64) -> Self {
        match (self.from_block, self.to_block) {
            (Some(from), Some(to)) if to >= from && to - from + 1 > max_blocks => Self {
                from_block: Some(to + 1 - max_blocks),
                to_block: Some(to),
            },
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range_bounded() {
        let range = BlockRange {
            from_block: Some(0),
            to_block: Some(9_999),
        };
        let bounded = range.bounded(1_000);
        assert_eq!(bounded.from_block, Some(9_000));
        assert_eq!(bounded.to_block, Some(9_999));

        let small = BlockRange {
            from_block: Some(10),
            to_block: Some(20),
        };
        assert_eq!(small.bounded(1_000), small);
        assert_eq!(BlockRange::latest().bounded(5), BlockRange::latest());
    }
}
