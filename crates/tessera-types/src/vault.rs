//! Vaults mirrored from the on-chain vault factory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, VaultId};

/// An internal account controlled by one or more external addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub vault_id: VaultId,
    /// Lowercased, de-duplicated, in insertion order
    pub controllers: Vec<Address>,
    pub rules: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vault {
    pub fn is_controller(&self, address: &Address) -> bool {
        self.controllers.contains(address)
    }
}
