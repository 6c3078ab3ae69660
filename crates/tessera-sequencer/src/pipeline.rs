//! Publish pipeline
//!
//! 1. Upload the payload to content-addressed storage (required)
//! 2. Anchor the content id on-chain together with the nonce (required)
//! 3. Archive to long-term storage (detached, recorded on the bundle row)
//! 4. Notify the webhook (detached, best effort)
//!
//! Steps already recorded on the bundle are skipped, so a bundle left
//! half-published by an earlier cycle resumes where it stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tessera_chain::{ArchivalCallbacks, ArchivalStore, ChainClient, ContentStore, Readiness};
use tessera_types::{Address, ArchivalStatus, ArchivalUpdate, Bundle};
use tessera_webhook::{SendOptions, WebhookClient};

use crate::{BundleStore, PublishStage, Result, SequencerError};

/// Outcome of steps 1 and 2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub nonce: u64,
    pub content_id: String,
    pub anchor_tx_hash: String,
}

/// Body POSTed to the webhook for every published bundle
#[derive(Debug, Clone, Serialize)]
pub struct BundleNotification {
    pub nonce: u64,
    pub content_id: String,
    pub anchor_tx_hash: String,
    pub proposer: Address,
    pub intention_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Webhook target and its per-call limits
#[derive(Clone)]
pub struct WebhookSink {
    pub client: WebhookClient,
    pub options: SendOptions,
}

// ============================================================================
// Detached work
// ============================================================================

/// Tracks detached tasks so shutdown can wait for them
#[derive(Clone, Default)]
pub struct DetachedTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DetachedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(future));
    }

    /// Tasks not yet finished
    pub async fn pending(&self) -> usize {
        let handles = self.handles.lock().await;
        handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every tracked task, aborting stragglers after `timeout`.
    ///
    /// Returns `true` when everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        if handles.is_empty() {
            return true;
        }

        let count = handles.len();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                debug!(count, "Detached tasks drained");
                true
            }
            Err(_) => {
                warn!(count, timeout_ms = timeout.as_millis() as u64, "Detached tasks did not finish in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

// ============================================================================
// Archival callbacks
// ============================================================================

/// Writes archival progress of one bundle to the store
struct ArchivalRecorder {
    store: Arc<dyn BundleStore>,
    nonce: u64,
}

impl ArchivalRecorder {
    async fn record(&self, update: ArchivalUpdate) {
        if let Err(e) = self.store.update_archival(self.nonce, update).await {
            error!(nonce = self.nonce, error = %e, "Failed to record archival progress");
        }
    }
}

#[async_trait]
impl ArchivalCallbacks for ArchivalRecorder {
    async fn on_tx_submitted(&self, tx_hash: String) {
        debug!(nonce = self.nonce, tx_hash = %tx_hash, "Archival tx submitted");
        self.record(ArchivalUpdate::TxSubmitted { tx_hash }).await;
    }

    async fn on_complete(&self, piece_id: String) {
        debug!(nonce = self.nonce, piece_id = %piece_id, "Archival upload complete");
        self.record(ArchivalUpdate::Completed { piece_id }).await;
    }

    async fn on_confirmed(&self) {
        info!(nonce = self.nonce, "Archival confirmed");
        self.record(ArchivalUpdate::Confirmed { at: Utc::now() }).await;
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct PublishPipeline {
    store: Arc<dyn BundleStore>,
    content: Arc<dyn ContentStore>,
    chain: Arc<dyn ChainClient>,
    archival: Option<Arc<dyn ArchivalStore>>,
    webhook: Option<WebhookSink>,
    tasks: DetachedTasks,
}

impl PublishPipeline {
    pub fn new(
        store: Arc<dyn BundleStore>,
        content: Arc<dyn ContentStore>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            store,
            content,
            chain,
            archival: None,
            webhook: None,
            tasks: DetachedTasks::new(),
        }
    }

    pub fn with_archival(mut self, archival: Arc<dyn ArchivalStore>) -> Self {
        self.archival = Some(archival);
        self
    }

    pub fn with_webhook(mut self, webhook: WebhookSink) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn tasks(&self) -> &DetachedTasks {
        &self.tasks
    }

    /// Run the required steps, then hand archival and notification to
    /// detached tasks
    pub async fn publish(&self, bundle: &Bundle) -> Result<PublishReceipt> {
        let nonce = bundle.nonce;

        let content_id = match &bundle.content_id {
            Some(cid) => cid.clone(),
            None => {
                let cid = self
                    .content
                    .put(bundle.payload.as_bytes().to_vec())
                    .await
                    .map_err(|source| SequencerError::Publish {
                        nonce,
                        stage: PublishStage::Upload,
                        source,
                    })?;
                self.store.set_content_id(nonce, &cid).await?;
                info!(nonce, content_id = %cid, "Bundle uploaded");
                cid
            }
        };

        let anchor_tx_hash = match &bundle.anchor_tx_hash {
            Some(tx) => tx.clone(),
            None => {
                let tx = self
                    .chain
                    .submit_bundle(nonce, &content_id)
                    .await
                    .map_err(|source| SequencerError::Publish {
                        nonce,
                        stage: PublishStage::Anchor,
                        source,
                    })?;
                self.store.mark_anchored(nonce, &tx).await?;
                info!(nonce, tx_hash = %tx, "Bundle anchored");
                tx
            }
        };

        if bundle.archival_status == ArchivalStatus::Pending {
            self.spawn_archival(bundle, &content_id).await;
        }

        let receipt = PublishReceipt {
            nonce,
            content_id,
            anchor_tx_hash,
        };
        self.spawn_notification(bundle, &receipt).await;

        Ok(receipt)
    }

    /// Record an out-of-band archival confirmation
    pub async fn confirm_archival(&self, nonce: u64, at: DateTime<Utc>) -> Result<Bundle> {
        self.store
            .get_by_nonce(nonce)
            .await?
            .ok_or(SequencerError::BundleNotFound { nonce })?;
        self.store
            .update_archival(nonce, ArchivalUpdate::Confirmed { at })
            .await?;
        info!(nonce, "Archival confirmed");
        self.store
            .get_by_nonce(nonce)
            .await?
            .ok_or(SequencerError::BundleNotFound { nonce })
    }

    async fn spawn_archival(&self, bundle: &Bundle, content_id: &str) {
        let Some(archival) = self.archival.clone() else {
            return;
        };

        let store = self.store.clone();
        let nonce = bundle.nonce;
        let bytes = bundle.payload.as_bytes().to_vec();
        let content_id = content_id.to_string();

        self.tasks
            .spawn(async move {
                archive(store, archival, nonce, bytes, content_id).await;
            })
            .await;
    }

    async fn spawn_notification(&self, bundle: &Bundle, receipt: &PublishReceipt) {
        let Some(sink) = self.webhook.clone() else {
            return;
        };

        let notification = BundleNotification {
            nonce: receipt.nonce,
            content_id: receipt.content_id.clone(),
            anchor_tx_hash: receipt.anchor_tx_hash.clone(),
            proposer: bundle.proposer.clone(),
            intention_count: bundle
                .decode_payload()
                .map(|p| p.intentions.len())
                .unwrap_or_default(),
            created_at: bundle.created_at,
        };

        self.tasks
            .spawn(async move {
                if let Err(e) = sink.client.send(&notification, sink.options).await {
                    warn!(nonce = notification.nonce, error = %e, "Bundle webhook failed");
                }
            })
            .await;
    }
}

async fn archive(
    store: Arc<dyn BundleStore>,
    archival: Arc<dyn ArchivalStore>,
    nonce: u64,
    bytes: Vec<u8>,
    content_id: String,
) {
    let recorder = Arc::new(ArchivalRecorder {
        store: store.clone(),
        nonce,
    });
    recorder.record(ArchivalUpdate::Uploading).await;

    let failure = match archival.check_readiness(bytes.len()).await {
        Ok(Readiness::Ready) => archival
            .upload(bytes, &content_id, recorder.clone())
            .await
            .err()
            .map(|e| e.to_string()),
        Ok(Readiness::Blocked { reason }) => Some(format!("archival blocked: {}", reason)),
        Err(e) => Some(format!("readiness check failed: {}", e)),
    };

    if let Some(error) = failure {
        warn!(nonce, error = %error, "Bundle archival failed");
        recorder.record(ArchivalUpdate::Failed { error }).await;
    }
}
