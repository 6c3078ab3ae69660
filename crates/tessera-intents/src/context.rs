//! Capabilities and settings shared by every handler

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tessera_chain::ChainClient;
use tessera_crypto::ProposerKey;
use tessera_ledger::DepositLedger;
use tessera_registry::VaultRegistry;
use tessera_types::{Address, Amount};

use crate::DepositDiscovery;

/// One initial token grant for a freshly created vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedGrant {
    pub asset: Address,
    pub amount: Amount,
}

/// Handler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentsConfig {
    /// Widest block range one discovery scan may cover
    pub max_scan_blocks: u64,
    /// Re-queries after losing a hold race, per input
    pub hold_attempts: u32,
    /// Grants attached to every new vault; empty disables seeding
    pub seed_grants: Vec<SeedGrant>,
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            max_scan_blocks: 10_000,
            hold_attempts: 3,
            seed_grants: Vec::new(),
        }
    }
}

/// Injected into every handler call
#[derive(Clone)]
pub struct HandlerContext {
    pub ledger: Arc<dyn DepositLedger>,
    pub registry: Arc<dyn VaultRegistry>,
    pub chain: Arc<dyn ChainClient>,
    pub discovery: DepositDiscovery,
    /// Signs intentions the node produces itself
    pub node_key: ProposerKey,
    pub config: IntentsConfig,
}

impl HandlerContext {
    pub fn new(
        ledger: Arc<dyn DepositLedger>,
        registry: Arc<dyn VaultRegistry>,
        chain: Arc<dyn ChainClient>,
        node_key: ProposerKey,
        config: IntentsConfig,
    ) -> Self {
        let discovery = DepositDiscovery::new(chain.clone(), ledger.clone(), config.max_scan_blocks);
        Self {
            ledger,
            registry,
            chain,
            discovery,
            node_key,
            config,
        }
    }
}
