//! Intentions and the proofs produced for them
//!
//! An intention is a signed instruction describing a desired balance or
//! asset movement. Handlers turn a [`SignedIntention`] into a
//! [`ProcessedIntention`] carrying one or more [`ProofEntry`] values; from
//! then on it is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, AssetKind, BlockRange, DepositId, IntentionId, VaultId};

/// Intention action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Allocate pre-deposited funds to vaults
    AssignDeposit,
    /// Create a vault on-chain and mirror it locally
    CreateVault,
    /// Change controllers or rules of an existing vault
    UpdateVault,
    /// Initial token grants for a new vault. Produced by the node only.
    SeedVault,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AssignDeposit => "assign_deposit",
            Self::CreateVault => "create_vault",
            Self::UpdateVault => "update_vault",
            Self::SeedVault => "seed_vault",
        };
        f.write_str(s)
    }
}

/// Value entering the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionInput {
    pub asset: Address,
    pub amount: Amount,
    pub chain_id: u64,
    /// Optional discovery hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
}

impl IntentionInput {
    pub fn asset_kind(&self) -> AssetKind {
        AssetKind::classify(&self.asset)
    }

    pub fn block_range(&self) -> BlockRange {
        BlockRange {
            from_block: self.from_block,
            to_block: self.to_block,
        }
    }
}

/// Value leaving towards a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionOutput {
    pub asset: Address,
    pub amount: Amount,
    pub vault_id: VaultId,
}

/// Vault mutation carried by an `UpdateVault` intention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VaultUpdate {
    AddController { address: Address },
    RemoveController { address: Address },
    SetRules { rules: Option<String> },
}

/// The unsigned body of an intention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub action: ActionKind,
    /// Client-chosen nonce, echoed into the bundle
    pub nonce: u64,
    #[serde(default)]
    pub inputs: Vec<IntentionInput>,
    #[serde(default)]
    pub outputs: Vec<IntentionOutput>,
    /// Target vault for `UpdateVault`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<VaultId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<VaultUpdate>,
    /// Initial rules for `CreateVault`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
}

/// An intention together with the address its signature attests to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIntention {
    pub intention: Intention,
    pub controller: Address,
    pub signature: String,
}

/// Outcome of the best-effort seeding step of vault creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeedingOutcome {
    Seeded { intention_id: IntentionId },
    Skipped,
    Failed { error: String },
}

/// Evidence attached to a processed intention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProofEntry {
    DepositMatch {
        input_index: usize,
        deposit_id: DepositId,
        amount: Amount,
        vault_id: VaultId,
    },
    VaultCreated {
        vault_id: VaultId,
        tx_hash: String,
        seeding: SeedingOutcome,
    },
    VaultUpdated {
        vault_id: VaultId,
        controllers: Vec<Address>,
        rules: Option<String>,
    },
    Grant {
        vault_id: VaultId,
        asset: Address,
        amount: Amount,
    },
}

/// An intention accepted by a handler and waiting for the next bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedIntention {
    pub id: IntentionId,
    pub action: ActionKind,
    pub controller: Address,
    pub signature: String,
    pub intention: Intention,
    pub proofs: Vec<ProofEntry>,
    pub received_at: DateTime<Utc>,
}

impl ProcessedIntention {
    /// Reference under which this intention's deposit holds are recorded
    pub fn hold_reference(&self) -> String {
        hold_reference(&self.id)
    }

    pub fn has_deposit_matches(&self) -> bool {
        self.proofs
            .iter()
            .any(|p| matches!(p, ProofEntry::DepositMatch { .. }))
    }
}

pub fn hold_reference(id: &IntentionId) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intention_wire_format() {
        let json = serde_json::json!({
            "action": "assign_deposit",
            "nonce": 7,
            "inputs": [{
                "asset": "0x0000000000000000000000000000000000000000",
                "amount": "1.5",
                "chain_id": 1,
                "from_block": 100
            }],
            "outputs": [{
                "asset": "0x0000000000000000000000000000000000000000",
                "amount": "1.5",
                "vault_id": 3
            }]
        });

        let intention: Intention = serde_json::from_value(json).unwrap();
        assert_eq!(intention.action, ActionKind::AssignDeposit);
        assert_eq!(intention.inputs[0].asset_kind(), AssetKind::Native);
        assert_eq!(intention.inputs[0].block_range().from_block, Some(100));
        assert_eq!(intention.outputs[0].vault_id, VaultId(3));
        assert!(intention.update.is_none());
    }

    #[test]
    fn test_vault_update_tagging() {
        let update: VaultUpdate = serde_json::from_value(serde_json::json!({
            "op": "set_rules",
            "rules": null
        }))
        .unwrap();
        assert_eq!(update, VaultUpdate::SetRules { rules: None });
    }
}
