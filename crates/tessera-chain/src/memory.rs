//! In-memory chain, content store and archival store
//!
//! Used by tests and by the node's dev mode. Each fake has switches that
//! make its next calls fail so publish and recovery paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use tessera_crypto::{keccak256_hex, sha256_hex};
use tessera_types::{Address, AssetKind, BlockRange, NewDeposit, VaultId};

use crate::events::encode_vault_created;
use crate::{
    ArchivalCallbacks, ArchivalStore, ChainClient, ChainError, ContentStore, Readiness, Result,
    TxReceipt,
};

const FACTORY_ADDRESS: &str = "0x000000000000000000000000000000000000fac7";

// ============================================================================
// Chain
// ============================================================================

#[derive(Default)]
struct ChainState {
    deposits: RwLock<Vec<(u64, NewDeposit)>>,
    anchors: RwLock<Vec<(u64, String)>>,
    next_vault_id: AtomicU64,
    tx_counter: AtomicU64,
    discover_calls: AtomicUsize,
    fail_anchoring: AtomicBool,
    fail_vault_creation: AtomicBool,
    omit_vault_event: AtomicBool,
}

/// A chain that lives in memory
#[derive(Clone, Default)]
pub struct InMemoryChain {
    state: Arc<ChainState>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a deposit visible to discovery at `block`
    pub async fn push_deposit(&self, block: u64, deposit: NewDeposit) {
        self.state.deposits.write().await.push((block, deposit));
    }

    /// Anchored `(nonce, content_id)` pairs in submission order
    pub async fn anchors(&self) -> Vec<(u64, String)> {
        self.state.anchors.read().await.clone()
    }

    pub fn discover_calls(&self) -> usize {
        self.state.discover_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_anchoring(&self, fail: bool) {
        self.state.fail_anchoring.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_vault_creation(&self, fail: bool) {
        self.state.fail_vault_creation.store(fail, Ordering::SeqCst);
    }

    /// Mine vault creations without the `VaultCreated` log
    pub fn set_omit_vault_event(&self, omit: bool) {
        self.state.omit_vault_event.store(omit, Ordering::SeqCst);
    }

    fn next_tx_hash(&self) -> String {
        let n = self.state.tx_counter.fetch_add(1, Ordering::SeqCst);
        keccak256_hex(format!("tessera-dev-tx:{}", n).as_bytes())
    }
}

fn in_range(block: u64, range: &BlockRange) -> bool {
    range.from_block.map_or(true, |from| block >= from)
        && range.to_block.map_or(true, |to| block <= to)
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn discover_deposits(
        &self,
        asset: &AssetKind,
        chain_id: u64,
        range: BlockRange,
    ) -> Result<Vec<NewDeposit>> {
        self.state.discover_calls.fetch_add(1, Ordering::SeqCst);
        let token = asset.address();
        let deposits = self.state.deposits.read().await;
        Ok(deposits
            .iter()
            .filter(|(block, d)| d.token == token && d.chain_id == chain_id && in_range(*block, &range))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn create_vault(&self, controller: &Address) -> Result<TxReceipt> {
        if self.state.fail_vault_creation.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("vault factory unavailable".to_string()));
        }

        let vault_id = VaultId(self.state.next_vault_id.fetch_add(1, Ordering::SeqCst) + 1);
        let logs = if self.state.omit_vault_event.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            vec![encode_vault_created(FACTORY_ADDRESS, vault_id, controller)]
        };
        let receipt = TxReceipt {
            tx_hash: self.next_tx_hash(),
            block_number: Some(vault_id.0),
            logs,
        };

        debug!(vault_id = %vault_id, controller = %controller, "Dev chain created vault");
        Ok(receipt)
    }

    async fn submit_bundle(&self, nonce: u64, content_id: &str) -> Result<String> {
        if self.state.fail_anchoring.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("anchor contract unavailable".to_string()));
        }
        self.state
            .anchors
            .write()
            .await
            .push((nonce, content_id.to_string()));
        Ok(self.next_tx_hash())
    }
}

// ============================================================================
// Content store
// ============================================================================

/// Content store keyed by the SHA-256 of the stored bytes
#[derive(Clone, Default)]
pub struct InMemoryContentStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn get(&self, content_id: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(content_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("content store unavailable".to_string()));
        }
        let cid = format!("sha256-{}", sha256_hex(&bytes));
        self.objects.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }
}

// ============================================================================
// Archival store
// ============================================================================

#[derive(Default)]
struct ArchivalState {
    uploads: RwLock<Vec<String>>,
    blocked: RwLock<Option<String>>,
    failing: AtomicBool,
    auto_confirm: AtomicBool,
}

/// Archival store that accepts uploads immediately
#[derive(Clone, Default)]
pub struct InMemoryArchivalStore {
    state: Arc<ArchivalState>,
}

impl InMemoryArchivalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `blocked` from readiness checks until cleared with `None`
    pub async fn set_blocked(&self, reason: Option<String>) {
        *self.state.blocked.write().await = reason;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Fire `on_confirmed` as part of every upload
    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.state.auto_confirm.store(auto_confirm, Ordering::SeqCst);
    }

    /// Content ids uploaded so far
    pub async fn uploads(&self) -> Vec<String> {
        self.state.uploads.read().await.clone()
    }
}

#[async_trait]
impl ArchivalStore for InMemoryArchivalStore {
    async fn check_readiness(&self, _size: usize) -> Result<Readiness> {
        Ok(match self.state.blocked.read().await.clone() {
            Some(reason) => Readiness::Blocked { reason },
            None => Readiness::Ready,
        })
    }

    async fn upload(
        &self,
        _bytes: Vec<u8>,
        content_id: &str,
        callbacks: Arc<dyn ArchivalCallbacks>,
    ) -> Result<()> {
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("archival upload rejected".to_string()));
        }

        let piece = {
            let mut uploads = self.state.uploads.write().await;
            uploads.push(content_id.to_string());
            uploads.len()
        };

        callbacks
            .on_tx_submitted(keccak256_hex(content_id.as_bytes()))
            .await;
        callbacks.on_complete(format!("piece-{}", piece)).await;
        if self.state.auto_confirm.load(Ordering::SeqCst) {
            callbacks.on_confirmed().await;
        }
        Ok(())
    }
}
