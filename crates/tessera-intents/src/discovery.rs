//! Deposit discovery
//!
//! Scans the chain for deposits of one asset and ingests whatever it finds.
//! Ingestion is idempotent, so repeated scans over the same range are safe.

use std::sync::Arc;

use tracing::{debug, info};

use tessera_chain::ChainClient;
use tessera_ledger::DepositLedger;
use tessera_types::{AssetKind, BlockRange};

use crate::Result;

#[derive(Clone)]
pub struct DepositDiscovery {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn DepositLedger>,
    max_scan_blocks: u64,
}

impl DepositDiscovery {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn DepositLedger>,
        max_scan_blocks: u64,
    ) -> Self {
        Self {
            chain,
            ledger,
            max_scan_blocks: max_scan_blocks.max(1),
        }
    }

    /// Scan `range`, clamped to the newest `max_scan_blocks` blocks, and
    /// ingest the results. Returns the number of deposits seen.
    pub async fn scan(&self, asset: &AssetKind, chain_id: u64, range: BlockRange) -> Result<usize> {
        let range = range.bounded(self.max_scan_blocks);
        let found = self.chain.discover_deposits(asset, chain_id, range).await?;
        let count = found.len();

        for deposit in found {
            let stored = self.ledger.ingest(deposit).await?;
            debug!(deposit_id = %stored.id, transfer_uid = %stored.transfer_uid, "Deposit ingested");
        }

        if count > 0 {
            info!(
                chain_id,
                asset = %asset.address(),
                from_block = ?range.from_block,
                to_block = ?range.to_block,
                count,
                "Deposit discovery scan"
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_chain::InMemoryChain;
    use tessera_ledger::InMemoryDepositLedger;
    use tessera_types::{Address, Amount, NewDeposit};

    fn deposit(uid: &str) -> NewDeposit {
        NewDeposit {
            tx_hash: format!("0x{}", uid),
            transfer_uid: uid.to_string(),
            chain_id: 1,
            depositor: Address::parse("0x00000000000000000000000000000000000000d1").unwrap(),
            token: Address::zero(),
            amount: Amount::parse("5").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_scan_is_bounded_and_idempotent() {
        let chain = InMemoryChain::new();
        chain.push_deposit(10, deposit("old")).await;
        chain.push_deposit(995, deposit("new")).await;
        let ledger = InMemoryDepositLedger::new();
        let discovery = DepositDiscovery::new(Arc::new(chain), Arc::new(ledger.clone()), 100);

        let range = BlockRange {
            from_block: Some(0),
            to_block: Some(1_000),
        };
        assert_eq!(discovery.scan(&AssetKind::Native, 1, range).await.unwrap(), 1);
        assert_eq!(discovery.scan(&AssetKind::Native, 1, range).await.unwrap(), 1);
        assert_eq!(ledger.len().await, 1);
    }
}
