//! Bundle persistence

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use tessera_db::{BundleRepo, DbError};
use tessera_types::{ArchivalStatus, ArchivalUpdate, Bundle, NewBundle};

use crate::{Result, SequencerError};

/// Bundle persistence capability
///
/// The sequencer is the only writer of new nonces; the store enforces their
/// uniqueness.
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn last_nonce(&self) -> Result<Option<u64>>;

    /// Persist a bundle; a taken nonce fails with `DuplicateNonce`
    async fn insert(&self, bundle: NewBundle) -> Result<Bundle>;

    async fn set_content_id(&self, nonce: u64, content_id: &str) -> Result<()>;

    async fn mark_anchored(&self, nonce: u64, tx_hash: &str) -> Result<()>;

    /// Apply an archival transition. `confirmed` is never overwritten by a failure.
    async fn update_archival(&self, nonce: u64, update: ArchivalUpdate) -> Result<()>;

    async fn get_by_nonce(&self, nonce: u64) -> Result<Option<Bundle>>;

    /// Newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Bundle>>;

    /// Bundles missing a content id or anchor tx hash, oldest nonce first
    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Bundle>>;

    /// Bundles whose deposit holds are not yet settled, oldest nonce first
    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Bundle>>;

    async fn mark_settled(&self, nonce: u64, at: DateTime<Utc>) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct StoreState {
    bundles: BTreeMap<u64, Bundle>,
    next_id: i64,
}

/// Bundle store held in memory
#[derive(Clone, Default)]
pub struct InMemoryBundleStore {
    state: Arc<RwLock<StoreState>>,
    fail_inserts: Arc<AtomicBool>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail as if the database were down
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

fn apply_archival(bundle: &mut Bundle, update: ArchivalUpdate) {
    match update {
        ArchivalUpdate::Uploading => {
            if bundle.archival_status != ArchivalStatus::Confirmed {
                bundle.archival_status = ArchivalStatus::Uploading;
                bundle.archival_error = None;
            }
        }
        ArchivalUpdate::TxSubmitted { tx_hash } => bundle.archival_tx_hash = Some(tx_hash),
        ArchivalUpdate::Completed { piece_id } => bundle.archival_piece_id = Some(piece_id),
        ArchivalUpdate::Confirmed { at } => {
            bundle.archival_status = ArchivalStatus::Confirmed;
            bundle.archival_confirmed_at = Some(at);
            bundle.archival_error = None;
        }
        ArchivalUpdate::Failed { error } => {
            if bundle.archival_status != ArchivalStatus::Confirmed {
                bundle.archival_status = ArchivalStatus::Failed;
                bundle.archival_error = Some(error);
            }
        }
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn last_nonce(&self) -> Result<Option<u64>> {
        Ok(self.state.read().await.bundles.keys().next_back().copied())
    }

    async fn insert(&self, bundle: NewBundle) -> Result<Bundle> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(SequencerError::Store {
                message: "bundle store unavailable".to_string(),
            });
        }

        let mut state = self.state.write().await;
        if state.bundles.contains_key(&bundle.nonce) {
            return Err(SequencerError::DuplicateNonce {
                nonce: bundle.nonce,
            });
        }

        state.next_id += 1;
        let stored = Bundle {
            id: state.next_id,
            nonce: bundle.nonce,
            payload: bundle.payload,
            proposer: bundle.proposer,
            signature: bundle.signature,
            content_id: None,
            anchor_tx_hash: None,
            archival_status: ArchivalStatus::Pending,
            archival_tx_hash: None,
            archival_piece_id: None,
            archival_confirmed_at: None,
            archival_error: None,
            holds_settled_at: None,
            created_at: Utc::now(),
        };
        state.bundles.insert(stored.nonce, stored.clone());
        Ok(stored)
    }

    async fn set_content_id(&self, nonce: u64, content_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let bundle = state
            .bundles
            .get_mut(&nonce)
            .ok_or(SequencerError::BundleNotFound { nonce })?;
        bundle.content_id = Some(content_id.to_string());
        Ok(())
    }

    async fn mark_anchored(&self, nonce: u64, tx_hash: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let bundle = state
            .bundles
            .get_mut(&nonce)
            .ok_or(SequencerError::BundleNotFound { nonce })?;
        bundle.anchor_tx_hash = Some(tx_hash.to_string());
        Ok(())
    }

    async fn update_archival(&self, nonce: u64, update: ArchivalUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let bundle = state
            .bundles
            .get_mut(&nonce)
            .ok_or(SequencerError::BundleNotFound { nonce })?;
        apply_archival(bundle, update);
        Ok(())
    }

    async fn get_by_nonce(&self, nonce: u64) -> Result<Option<Bundle>> {
        Ok(self.state.read().await.bundles.get(&nonce).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Bundle>> {
        let state = self.state.read().await;
        Ok(state
            .bundles
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Bundle>> {
        let state = self.state.read().await;
        Ok(state
            .bundles
            .values()
            .filter(|b| !b.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Bundle>> {
        let state = self.state.read().await;
        Ok(state
            .bundles
            .values()
            .filter(|b| b.holds_settled_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_settled(&self, nonce: u64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let bundle = state
            .bundles
            .get_mut(&nonce)
            .ok_or(SequencerError::BundleNotFound { nonce })?;
        bundle.holds_settled_at.get_or_insert(at);
        Ok(())
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

/// Bundle store persisted through [`BundleRepo`]
pub struct PgBundleStore {
    repo: BundleRepo,
}

impl PgBundleStore {
    pub fn new(repo: BundleRepo) -> Self {
        Self { repo }
    }
}

fn store_error(e: DbError) -> SequencerError {
    SequencerError::Store {
        message: e.to_string(),
    }
}

fn not_found(nonce: u64) -> impl FnOnce(DbError) -> SequencerError {
    move |e| match e {
        DbError::NotFound(_) => SequencerError::BundleNotFound { nonce },
        other => store_error(other),
    }
}

fn to_bundle(row: tessera_db::DbBundle) -> Result<Bundle> {
    Bundle::try_from(row).map_err(store_error)
}

fn to_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl BundleStore for PgBundleStore {
    async fn last_nonce(&self) -> Result<Option<u64>> {
        let last = self.repo.last_nonce().await.map_err(store_error)?;
        Ok(last.and_then(|n| u64::try_from(n).ok()))
    }

    async fn insert(&self, bundle: NewBundle) -> Result<Bundle> {
        let nonce = bundle.nonce;
        let row = self.repo.insert(&bundle).await.map_err(|e| {
            if e.is_unique_violation() {
                SequencerError::DuplicateNonce { nonce }
            } else {
                store_error(e)
            }
        })?;
        to_bundle(row)
    }

    async fn set_content_id(&self, nonce: u64, content_id: &str) -> Result<()> {
        self.repo
            .set_content_id(nonce, content_id)
            .await
            .map_err(not_found(nonce))
    }

    async fn mark_anchored(&self, nonce: u64, tx_hash: &str) -> Result<()> {
        self.repo
            .set_anchor_tx(nonce, tx_hash)
            .await
            .map_err(not_found(nonce))
    }

    async fn update_archival(&self, nonce: u64, update: ArchivalUpdate) -> Result<()> {
        self.repo
            .update_archival(nonce, &update)
            .await
            .map_err(store_error)
    }

    async fn get_by_nonce(&self, nonce: u64) -> Result<Option<Bundle>> {
        let row = self.repo.find_by_nonce(nonce).await.map_err(store_error)?;
        row.map(to_bundle).transpose()
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Bundle>> {
        let rows = self
            .repo
            .list(to_limit(limit), to_limit(offset))
            .await
            .map_err(store_error)?;
        rows.into_iter().map(to_bundle).collect()
    }

    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Bundle>> {
        let rows = self
            .repo
            .list_unpublished(to_limit(limit))
            .await
            .map_err(store_error)?;
        rows.into_iter().map(to_bundle).collect()
    }

    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Bundle>> {
        let rows = self
            .repo
            .list_unsettled(to_limit(limit))
            .await
            .map_err(store_error)?;
        rows.into_iter().map(to_bundle).collect()
    }

    async fn mark_settled(&self, nonce: u64, at: DateTime<Utc>) -> Result<()> {
        self.repo
            .set_holds_settled(nonce, at)
            .await
            .map_err(not_found(nonce))
    }
}
