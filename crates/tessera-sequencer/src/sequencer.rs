//! Bundle sequencer
//!
//! Periodically drains the intention cache into a signed, nonce-tagged
//! bundle, persists it, settles the deposit holds of its intentions, and
//! hands it to the publish pipeline.
//!
//! # Invariants
//!
//! 1. Nonces are strictly increasing with no gaps; an empty cycle consumes none
//! 2. At most one cycle runs at a time
//! 3. Intentions leave the cache only after their bundle is persisted
//! 4. A bundle that failed to publish is retried before any new bundle
//! 5. Bundles are anchored in nonce order
//! 6. Every bundled deposit hold is eventually settled into an assignment

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tessera_crypto::{sign_message, ProposerKey};
use tessera_ledger::DepositLedger;
use tessera_types::{Bundle, BundlePayload, NewBundle, ProcessedIntention};

use crate::{
    BundleStore, IntentionCache, PublishPipeline, PublishReceipt, Result, SequencerError,
};

/// Sequencer timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Time between bundle cycles
    pub interval_ms: u64,
    /// Unpublished or unsettled bundles retried per cycle
    pub recovery_batch: usize,
    /// How long shutdown waits for detached archival and webhook work
    pub drain_timeout_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            recovery_batch: 16,
            drain_timeout_ms: 30_000,
        }
    }
}

impl SequencerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// What the sequencer is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Draining,
    Publishing,
}

/// Result of one bundle cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing was queued
    Skipped,
    /// Persisted and published
    Published {
        nonce: u64,
        intentions: usize,
        receipt: PublishReceipt,
    },
    /// Persisted, but publishing failed; recovery retries it next cycle
    PublishFailed { nonce: u64, error: SequencerError },
    /// Persisted, but an older bundle is still unpublished; recovery
    /// publishes both in nonce order
    Deferred { nonce: u64 },
}

impl CycleOutcome {
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Self::Skipped => None,
            Self::Published { nonce, .. }
            | Self::PublishFailed { nonce, .. }
            | Self::Deferred { nonce } => Some(*nonce),
        }
    }
}

/// Everything guarded by the cycle lock
struct CycleState {
    last_nonce: u64,
}

pub struct BundleSequencer {
    cache: IntentionCache,
    store: Arc<dyn BundleStore>,
    ledger: Arc<dyn DepositLedger>,
    pipeline: PublishPipeline,
    key: ProposerKey,
    config: SequencerConfig,
    cycle: Mutex<CycleState>,
    /// Mirror of `CycleState::last_nonce` readable without the cycle lock
    last_nonce: AtomicU64,
    state: RwLock<SequencerState>,
}

impl BundleSequencer {
    /// Build a sequencer, resuming after the last persisted nonce
    pub async fn load(
        cache: IntentionCache,
        store: Arc<dyn BundleStore>,
        ledger: Arc<dyn DepositLedger>,
        pipeline: PublishPipeline,
        key: ProposerKey,
        config: SequencerConfig,
    ) -> Result<Self> {
        let last_nonce = store.last_nonce().await?.unwrap_or(0);
        info!(
            last_nonce,
            proposer = %key.address(),
            interval_ms = config.interval_ms,
            "Bundle sequencer loaded"
        );

        Ok(Self {
            cache,
            store,
            ledger,
            pipeline,
            key,
            config,
            cycle: Mutex::new(CycleState { last_nonce }),
            last_nonce: AtomicU64::new(last_nonce),
            state: RwLock::new(SequencerState::Idle),
        })
    }

    pub fn cache(&self) -> &IntentionCache {
        &self.cache
    }

    pub fn pipeline(&self) -> &PublishPipeline {
        &self.pipeline
    }

    pub async fn state(&self) -> SequencerState {
        *self.state.read().await
    }

    /// Last nonce this sequencer persisted or loaded
    pub fn last_nonce(&self) -> u64 {
        self.last_nonce.load(Ordering::SeqCst)
    }

    fn set_last_nonce(&self, cycle: &mut CycleState, nonce: u64) {
        cycle.last_nonce = nonce;
        self.last_nonce.store(nonce, Ordering::SeqCst);
    }

    fn batch(&self) -> usize {
        self.config.recovery_batch.max(1)
    }

    /// Run a cycle now, or fail with `Busy` if one is in flight
    pub async fn trigger(&self) -> Result<CycleOutcome> {
        let mut cycle = self.cycle.try_lock().map_err(|_| SequencerError::Busy)?;
        self.cycle_locked(&mut cycle).await
    }

    /// Run a cycle, waiting for any in-flight one to finish first
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let mut cycle = self.cycle.lock().await;
        self.cycle_locked(&mut cycle).await
    }

    async fn set_state(&self, state: SequencerState) {
        *self.state.write().await = state;
    }

    async fn cycle_locked(&self, cycle: &mut CycleState) -> Result<CycleOutcome> {
        self.set_state(SequencerState::Publishing).await;
        let backlog = match self.recover().await {
            Ok(recovered) => {
                if recovered > 0 {
                    info!(recovered, "Recovered unpublished bundles");
                }
                self.has_unpublished().await
            }
            Err(e) => {
                warn!(error = %e, "Bundle recovery failed");
                true
            }
        };

        match self.settle_pending().await {
            Ok((0, 0)) => {}
            Ok((settled, 0)) => info!(settled, "Settled holds of earlier bundles"),
            Ok((settled, unsettled)) => {
                warn!(settled, unsettled, "Some bundled holds are still unsettled")
            }
            Err(e) => warn!(error = %e, "Hold settlement retry failed"),
        }

        self.set_state(SequencerState::Draining).await;
        let outcome = self.drain_and_publish(cycle, backlog).await;
        self.set_state(SequencerState::Idle).await;
        outcome
    }

    /// Retry publishing of bundles left unpublished, oldest first.
    ///
    /// Stops at the first failure so bundles are anchored in nonce order,
    /// and returns that failure. Otherwise returns the number published.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.list_unpublished(self.batch()).await?;

        let mut published = 0;
        for bundle in pending {
            let receipt = self.pipeline.publish(&bundle).await?;
            debug!(nonce = receipt.nonce, "Recovered bundle published");
            published += 1;
        }
        Ok(published)
    }

    /// Whether any persisted bundle is still unpublished. A store error
    /// counts as yes so a new bundle never overtakes an older one.
    async fn has_unpublished(&self) -> bool {
        match self.store.list_unpublished(1).await {
            Ok(pending) => !pending.is_empty(),
            Err(e) => {
                warn!(error = %e, "Could not check for unpublished bundles");
                true
            }
        }
    }

    /// Retry hold settlement for persisted bundles, oldest first.
    ///
    /// Returns how many bundles of the batch were settled and how many
    /// still have outstanding holds.
    async fn settle_pending(&self) -> Result<(usize, usize)> {
        let pending = self.store.list_unsettled(self.batch()).await?;

        let mut settled = 0;
        let mut unsettled = 0;
        for bundle in pending {
            let payload = match bundle.decode_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(nonce = bundle.nonce, error = %e, "Bundle payload unreadable, holds not settled");
                    unsettled += 1;
                    continue;
                }
            };
            if self.settle(&payload.intentions).await {
                self.store.mark_settled(bundle.nonce, Utc::now()).await?;
                debug!(nonce = bundle.nonce, "Bundle holds settled on retry");
                settled += 1;
            } else {
                unsettled += 1;
            }
        }
        Ok((settled, unsettled))
    }

    /// Release deposit holds that belong to no queued or bundled intention.
    ///
    /// Intentions queued in memory are lost if the process stops before
    /// bundling them, and their holds would block the deposit value forever.
    /// Bundled intentions are settled first; while any bundle still has
    /// unsettled holds nothing is released. Run before accepting intentions.
    pub async fn release_orphaned_holds(&self) -> Result<u64> {
        let _cycle = self.cycle.lock().await;

        loop {
            let (settled, unsettled) = self.settle_pending().await?;
            if unsettled > 0 {
                return Err(SequencerError::UnsettledHolds { bundles: unsettled });
            }
            if settled < self.batch() {
                break;
            }
        }

        let queued: HashSet<String> = self
            .cache
            .snapshot()
            .await
            .iter()
            .map(|i| i.hold_reference())
            .collect();

        let mut released = 0;
        for reference in self.ledger.held_references().await? {
            if queued.contains(&reference) {
                continue;
            }
            let count = self.ledger.release_holds(&reference).await?;
            warn!(reference = %reference, count, "Released orphaned deposit holds");
            released += count;
        }
        Ok(released)
    }

    async fn drain_and_publish(
        &self,
        cycle: &mut CycleState,
        backlog: bool,
    ) -> Result<CycleOutcome> {
        let intentions = self.cache.snapshot().await;
        if intentions.is_empty() {
            debug!("No intentions queued, skipping cycle");
            return Ok(CycleOutcome::Skipped);
        }

        let count = intentions.len();
        let nonce = cycle.last_nonce + 1;
        let bundle = match self.persist(nonce, &intentions).await {
            Ok(bundle) => bundle,
            Err(SequencerError::DuplicateNonce { nonce }) => {
                // Another writer took the nonce; resync so the next cycle moves past it
                if let Ok(Some(last)) = self.store.last_nonce().await {
                    self.set_last_nonce(cycle, last);
                }
                error!(nonce, "Nonce already taken, resynced from store");
                return Err(SequencerError::DuplicateNonce { nonce });
            }
            Err(e) => {
                error!(nonce, error = %e, "Failed to persist bundle, intentions stay queued");
                return Err(e);
            }
        };

        self.set_last_nonce(cycle, nonce);
        self.cache.commit(count).await;
        info!(nonce, intentions = count, "Bundle persisted");

        if self.settle(&intentions).await {
            if let Err(e) = self.store.mark_settled(nonce, Utc::now()).await {
                warn!(nonce, error = %e, "Failed to record hold settlement");
            }
        }

        if backlog {
            debug!(nonce, "Older bundle still unpublished, deferring publish");
            return Ok(CycleOutcome::Deferred { nonce });
        }

        self.set_state(SequencerState::Publishing).await;
        match self.pipeline.publish(&bundle).await {
            Ok(receipt) => Ok(CycleOutcome::Published {
                nonce,
                intentions: count,
                receipt,
            }),
            Err(error) => {
                warn!(nonce, error = %error, "Bundle publish failed, will retry");
                Ok(CycleOutcome::PublishFailed { nonce, error })
            }
        }
    }

    async fn persist(&self, nonce: u64, intentions: &[ProcessedIntention]) -> Result<Bundle> {
        let payload = BundlePayload {
            nonce,
            proposer: self.key.address().clone(),
            created_at: Utc::now(),
            intentions: intentions.to_vec(),
        };
        let json = payload.to_canonical_json()?;
        let signature = sign_message(&self.key, json.as_bytes())?;

        self.store
            .insert(NewBundle {
                nonce,
                payload: json,
                proposer: self.key.address().clone(),
                signature,
            })
            .await
    }

    /// Convert the holds of bundled intentions into assignments.
    ///
    /// Settling is idempotent per intention, so a partly settled bundle is
    /// simply retried. Returns whether every intention settled.
    async fn settle(&self, intentions: &[ProcessedIntention]) -> bool {
        let mut all_settled = true;
        for intention in intentions.iter().filter(|i| i.has_deposit_matches()) {
            let reference = intention.hold_reference();
            match self.ledger.settle_holds(&reference).await {
                Ok(events) => {
                    debug!(intention_id = %intention.id, assignments = events.len(), "Holds settled");
                }
                Err(e) => {
                    warn!(intention_id = %intention.id, error = %e, "Failed to settle holds, will retry");
                    all_settled = false;
                }
            }
        }
        all_settled
    }

    /// Run cycles on the configured interval until `shutdown` flips to true.
    ///
    /// A cycle in flight when shutdown arrives is allowed to finish, then one
    /// final cycle bundles whatever is still queued. Stop accepting
    /// intentions before signalling shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_ms = self.config.interval_ms, "Bundle sequencer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(CycleOutcome::Skipped) => {}
                        Ok(outcome) => debug!(nonce = ?outcome.nonce(), "Bundle cycle finished"),
                        Err(e) => error!(error = %e, "Bundle cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match self.run_cycle().await {
            Ok(CycleOutcome::Skipped) => {}
            Ok(outcome) => info!(nonce = ?outcome.nonce(), "Final bundle cycle finished"),
            Err(e) => error!(error = %e, "Final bundle cycle failed, queued intentions are lost"),
        }

        info!("Bundle sequencer stopped");
    }

    /// Wait for detached archival and webhook tasks
    pub async fn shutdown(&self) -> bool {
        let drained = self.pipeline.tasks().drain(self.config.drain_timeout()).await;
        if drained {
            info!("Sequencer drained");
        }
        drained
    }
}
