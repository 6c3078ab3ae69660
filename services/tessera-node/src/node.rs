//! Component wiring
//!
//! Builds the same node from either PostgreSQL and HTTP bindings or, in dev
//! mode, in-memory stores and a simulated chain.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use tessera_chain::http::HttpEndpoint;
use tessera_chain::{
    ArchivalStore, ChainClient, ContentStore, HttpArchivalStore, HttpContentStore,
    InMemoryArchivalStore, InMemoryChain, InMemoryContentStore, RelayerChainClient,
};
use tessera_crypto::ProposerKey;
use tessera_db::Database;
use tessera_intents::{HandlerContext, IntentionService};
use tessera_ledger::{DepositLedger, InMemoryDepositLedger, PgDepositLedger};
use tessera_registry::{InMemoryVaultRegistry, PgVaultRegistry, VaultRegistry};
use tessera_sequencer::{
    BundleSequencer, BundleStore, InMemoryBundleStore, IntentionCache, PgBundleStore,
    PublishPipeline, WebhookSink,
};
use tessera_webhook::WebhookClient;

use crate::config::NodeConfig;

/// The long-lived components the binary runs
pub struct NodeParts {
    pub service: Arc<IntentionService>,
    pub sequencer: Arc<BundleSequencer>,
}

struct Bindings {
    ledger: Arc<dyn DepositLedger>,
    registry: Arc<dyn VaultRegistry>,
    bundles: Arc<dyn BundleStore>,
    chain: Arc<dyn ChainClient>,
    content: Arc<dyn ContentStore>,
    archival: Option<Arc<dyn ArchivalStore>>,
}

fn proposer_key(config: &NodeConfig) -> anyhow::Result<ProposerKey> {
    match &config.proposer.private_key {
        Some(hex) => ProposerKey::from_hex(hex).context("proposer.private_key is not a valid key"),
        None => {
            let key = ProposerKey::generate();
            warn!(proposer = %key.address(), "No proposer key configured, using an ephemeral one");
            Ok(key)
        }
    }
}

/// In-memory stores, a simulated chain and an archive that confirms at once
pub async fn build_dev(config: &NodeConfig) -> anyhow::Result<NodeParts> {
    let archival = InMemoryArchivalStore::new();
    archival.set_auto_confirm(true);

    let bindings = Bindings {
        ledger: Arc::new(InMemoryDepositLedger::new()),
        registry: Arc::new(InMemoryVaultRegistry::new()),
        bundles: Arc::new(InMemoryBundleStore::new()),
        chain: Arc::new(InMemoryChain::new()),
        content: Arc::new(InMemoryContentStore::new()),
        archival: Some(Arc::new(archival)),
    };
    info!("Dev mode: in-memory stores and simulated chain");
    assemble(config, bindings).await
}

pub async fn build_postgres(config: &NodeConfig, db: &Database) -> anyhow::Result<NodeParts> {
    let endpoint = |url: &str| {
        HttpEndpoint::new(url, config.chain.timeout()).with_api_key(config.chain.api_key.clone())
    };
    let relayer_url = config
        .chain
        .relayer_url
        .as_deref()
        .context("chain.relayer_url is required")?;
    let content_url = config
        .chain
        .content_url
        .as_deref()
        .context("chain.content_url is required")?;

    let archival: Option<Arc<dyn ArchivalStore>> = match config.chain.archival_url.as_deref() {
        Some(url) => Some(Arc::new(HttpArchivalStore::new(endpoint(url))?)),
        None => {
            warn!("No archival endpoint configured, bundles will not be archived");
            None
        }
    };

    let bindings = Bindings {
        ledger: Arc::new(PgDepositLedger::new(db.deposit_repo())),
        registry: Arc::new(PgVaultRegistry::new(db.vault_repo())),
        bundles: Arc::new(PgBundleStore::new(db.bundle_repo())),
        chain: Arc::new(RelayerChainClient::new(endpoint(relayer_url))?),
        content: Arc::new(HttpContentStore::new(endpoint(content_url))?),
        archival,
    };
    assemble(config, bindings).await
}

async fn assemble(config: &NodeConfig, bindings: Bindings) -> anyhow::Result<NodeParts> {
    let key = proposer_key(config)?;
    let cache = IntentionCache::new();

    let mut pipeline = PublishPipeline::new(
        bindings.bundles.clone(),
        bindings.content,
        bindings.chain.clone(),
    );
    if let Some(archival) = bindings.archival {
        pipeline = pipeline.with_archival(archival);
    }
    if let Some(webhook) = &config.webhook {
        info!(url = %webhook.url, max_retries = webhook.max_retries, "Bundle webhook enabled");
        pipeline = pipeline.with_webhook(WebhookSink {
            client: WebhookClient::from_config(webhook)?,
            options: webhook.send_options(),
        });
    }

    let sequencer = BundleSequencer::load(
        cache.clone(),
        bindings.bundles.clone(),
        bindings.ledger.clone(),
        pipeline,
        key.clone(),
        config.sequencer.clone(),
    )
    .await?;

    // Nothing is accepted yet, so every hold outside a bundle is left over
    if let Err(e) = sequencer.release_orphaned_holds().await {
        warn!(error = %e, "Orphaned deposit holds kept until the next start");
    }

    let ctx = HandlerContext::new(
        bindings.ledger,
        bindings.registry,
        bindings.chain,
        key,
        config.intents.clone(),
    );
    let service = IntentionService::new(ctx, cache, bindings.bundles);

    Ok(NodeParts {
        service: Arc::new(service),
        sequencer: Arc::new(sequencer),
    })
}
