//! Intention submission service
//!
//! Entry point for callers above the core: dispatches a signed intention to
//! its handler, queues the processed result for the next bundle, and serves
//! bundle reads.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use tessera_sequencer::{BundleStore, IntentionCache};
use tessera_types::{ActionKind, Bundle, IntentionId, ProcessedIntention, SignedIntention};

use crate::handlers::{
    AssignDepositHandler, CreateVaultHandler, HandlerRequest, IntentionHandler,
    SeedVaultHandler, UpdateVaultHandler,
};
use crate::{HandlerContext, IntentError, Result};

/// Upper bound on one page of [`IntentionService::list_bundles`]
pub const MAX_PAGE: usize = 100;

pub struct IntentionService {
    ctx: HandlerContext,
    cache: IntentionCache,
    bundles: Arc<dyn BundleStore>,
    handlers: HashMap<ActionKind, Arc<dyn IntentionHandler>>,
}

impl IntentionService {
    pub fn new(ctx: HandlerContext, cache: IntentionCache, bundles: Arc<dyn BundleStore>) -> Self {
        let mut service = Self {
            ctx,
            cache,
            bundles,
            handlers: HashMap::new(),
        };
        service.register(Arc::new(AssignDepositHandler));
        service.register(Arc::new(CreateVaultHandler));
        service.register(Arc::new(UpdateVaultHandler));
        service.register(Arc::new(SeedVaultHandler));
        service
    }

    fn register(&mut self, handler: Arc<dyn IntentionHandler>) {
        self.handlers.insert(handler.action(), handler);
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Validate and process an intention, then queue it for bundling.
    ///
    /// A rejected intention is never queued.
    pub async fn submit_intention(&self, signed: SignedIntention) -> Result<ProcessedIntention> {
        let action = signed.intention.action;
        if action == ActionKind::SeedVault {
            return Err(IntentError::InternalAction { action });
        }
        let handler = self
            .handlers
            .get(&action)
            .ok_or_else(|| IntentError::invalid(format!("no handler for {}", action)))?;

        let id = IntentionId::new();
        debug!(intention_id = %id, action = %action, controller = %signed.controller, "Processing intention");

        let output = match handler
            .handle(&self.ctx, HandlerRequest { id, signed: &signed })
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(intention_id = %id, action = %action, class = %e.class(), error = %e, "Intention rejected");
                return Err(e);
            }
        };

        let processed = ProcessedIntention {
            id,
            action,
            controller: signed.controller,
            signature: signed.signature,
            intention: signed.intention,
            proofs: output.proofs,
            received_at: Utc::now(),
        };
        // Follow-ups must sit directly behind the intention that produced them
        self.cache
            .append_all(std::iter::once(processed.clone()).chain(output.follow_ups))
            .await;

        info!(intention_id = %id, action = %action, "Intention queued");
        Ok(processed)
    }

    pub async fn get_bundle_by_nonce(&self, nonce: u64) -> Result<Option<Bundle>> {
        Ok(self.bundles.get_by_nonce(nonce).await?)
    }

    /// Newest first; `limit` is clamped to [`MAX_PAGE`]
    pub async fn list_bundles(&self, limit: usize, offset: usize) -> Result<Vec<Bundle>> {
        Ok(self.bundles.list(limit.clamp(1, MAX_PAGE), offset).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntentsConfig, SeedGrant};
    use tessera_chain::InMemoryChain;
    use tessera_crypto::ProposerKey;
    use tessera_ledger::{DepositLedger, InMemoryDepositLedger};
    use tessera_registry::{InMemoryVaultRegistry, VaultRegistry};
    use tessera_sequencer::InMemoryBundleStore;
    use tessera_types::{
        Address, Amount, DepositQuery, ErrorClass, Intention, IntentionInput, IntentionOutput,
        NewDeposit, ProofEntry, SeedingOutcome, VaultId, VaultUpdate,
    };

    struct Fixture {
        service: Arc<IntentionService>,
        cache: IntentionCache,
        ledger: InMemoryDepositLedger,
        registry: InMemoryVaultRegistry,
        chain: InMemoryChain,
    }

    fn fixture(config: IntentsConfig) -> Fixture {
        let cache = IntentionCache::new();
        let ledger = InMemoryDepositLedger::new();
        let registry = InMemoryVaultRegistry::new();
        let chain = InMemoryChain::new();
        let ctx = HandlerContext::new(
            Arc::new(ledger.clone()),
            Arc::new(registry.clone()),
            Arc::new(chain.clone()),
            ProposerKey::generate(),
            config,
        );
        let service = IntentionService::new(ctx, cache.clone(), Arc::new(InMemoryBundleStore::new()));
        Fixture {
            service: Arc::new(service),
            cache,
            ledger,
            registry,
            chain,
        }
    }

    fn alice() -> Address {
        Address::parse("0x00000000000000000000000000000000000000a1").unwrap()
    }

    fn bob() -> Address {
        Address::parse("0x00000000000000000000000000000000000000b2").unwrap()
    }

    fn signed(controller: Address, intention: Intention) -> SignedIntention {
        SignedIntention {
            intention,
            controller,
            signature: "0xsig".to_string(),
        }
    }

    fn bare(action: ActionKind) -> Intention {
        Intention {
            action,
            nonce: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            vault_id: None,
            update: None,
            rules: None,
        }
    }

    fn assign(amounts: &[&str], vault_id: VaultId) -> Intention {
        let mut intention = bare(ActionKind::AssignDeposit);
        for amount in amounts {
            intention.inputs.push(IntentionInput {
                asset: Address::zero(),
                amount: Amount::parse(amount).unwrap(),
                chain_id: 1,
                from_block: None,
                to_block: None,
            });
            intention.outputs.push(IntentionOutput {
                asset: Address::zero(),
                amount: Amount::parse(amount).unwrap(),
                vault_id,
            });
        }
        intention
    }

    async fn on_chain_deposit(f: &Fixture, uid: &str, amount: &str) {
        f.chain
            .push_deposit(
                1,
                NewDeposit {
                    tx_hash: format!("0x{}", uid),
                    transfer_uid: uid.to_string(),
                    chain_id: 1,
                    depositor: alice(),
                    token: Address::zero(),
                    amount: Amount::parse(amount).unwrap(),
                },
            )
            .await;
    }

    async fn create_vault(f: &Fixture) -> VaultId {
        let processed = f
            .service
            .submit_intention(signed(alice(), bare(ActionKind::CreateVault)))
            .await
            .unwrap();
        match &processed.proofs[0] {
            ProofEntry::VaultCreated { vault_id, .. } => *vault_id,
            other => panic!("unexpected proof {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_seed_vault_rejected_from_outside() {
        let f = fixture(IntentsConfig::default());
        let err = f
            .service
            .submit_intention(signed(alice(), bare(ActionKind::SeedVault)))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_vault_mirrors_chain() {
        let f = fixture(IntentsConfig::default());
        let vault_id = create_vault(&f).await;

        let vault = f.registry.get(vault_id).await.unwrap().unwrap();
        assert_eq!(vault.controllers, vec![alice()]);

        let queued = f.cache.snapshot().await;
        assert_eq!(queued.len(), 1);
        assert!(matches!(
            queued[0].proofs[0],
            ProofEntry::VaultCreated { seeding: SeedingOutcome::Skipped, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_vault_queues_seed_after_it() {
        let f = fixture(IntentsConfig {
            seed_grants: vec![SeedGrant {
                asset: Address::zero(),
                amount: Amount::parse("10").unwrap(),
            }],
            ..Default::default()
        });
        let vault_id = create_vault(&f).await;

        let queued = f.cache.snapshot().await;
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].action, ActionKind::CreateVault);
        assert_eq!(queued[1].action, ActionKind::SeedVault);
        assert!(matches!(
            &queued[0].proofs[0],
            ProofEntry::VaultCreated { seeding: SeedingOutcome::Seeded { intention_id }, .. }
                if *intention_id == queued[1].id
        ));
        assert!(matches!(
            &queued[1].proofs[0],
            ProofEntry::Grant { vault_id: v, .. } if *v == vault_id
        ));
    }

    #[tokio::test]
    async fn test_concurrent_creates_keep_seed_adjacent() {
        let f = fixture(IntentsConfig {
            seed_grants: vec![SeedGrant {
                asset: Address::zero(),
                amount: Amount::parse("10").unwrap(),
            }],
            ..Default::default()
        });

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = f.service.clone();
                tokio::spawn(async move {
                    service
                        .submit_intention(signed(alice(), bare(ActionKind::CreateVault)))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let queued = f.cache.snapshot().await;
        assert_eq!(queued.len(), 16);
        for pair in queued.chunks(2) {
            assert_eq!(pair[0].action, ActionKind::CreateVault);
            assert_eq!(pair[1].action, ActionKind::SeedVault);
            assert!(matches!(
                &pair[0].proofs[0],
                ProofEntry::VaultCreated { seeding: SeedingOutcome::Seeded { intention_id }, .. }
                    if *intention_id == pair[1].id
            ));
        }
    }

    #[tokio::test]
    async fn test_seeding_failure_keeps_vault() {
        let f = fixture(IntentsConfig {
            seed_grants: vec![SeedGrant {
                asset: Address::zero(),
                amount: Amount::zero(),
            }],
            ..Default::default()
        });
        let vault_id = create_vault(&f).await;

        assert!(f.registry.get(vault_id).await.unwrap().is_some());
        let queued = f.cache.snapshot().await;
        assert_eq!(queued.len(), 1);
        assert!(matches!(
            queued[0].proofs[0],
            ProofEntry::VaultCreated { seeding: SeedingOutcome::Failed { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_vault_without_event_fails() {
        let f = fixture(IntentsConfig::default());
        f.chain.set_omit_vault_event(true);

        let err = f
            .service
            .submit_intention(signed(alice(), bare(ActionKind::CreateVault)))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::Chain(_)));
        assert!(f.registry.vaults_of(&alice()).await.unwrap().is_empty());
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_vault_requires_controller() {
        let f = fixture(IntentsConfig::default());
        let vault_id = create_vault(&f).await;

        let mut add = bare(ActionKind::UpdateVault);
        add.vault_id = Some(vault_id);
        add.update = Some(VaultUpdate::AddController { address: bob() });

        let err = f
            .service
            .submit_intention(signed(bob(), add.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::NotController { .. }));

        let processed = f.service.submit_intention(signed(alice(), add)).await.unwrap();
        assert!(matches!(
            &processed.proofs[0],
            ProofEntry::VaultUpdated { controllers, .. } if controllers == &vec![alice(), bob()]
        ));

        let mut rules = bare(ActionKind::UpdateVault);
        rules.vault_id = Some(vault_id);
        rules.update = Some(VaultUpdate::SetRules {
            rules: Some("max:100".to_string()),
        });
        f.service.submit_intention(signed(bob(), rules)).await.unwrap();
        assert_eq!(
            f.registry.get(vault_id).await.unwrap().unwrap().rules.as_deref(),
            Some("max:100")
        );
    }

    #[tokio::test]
    async fn test_assign_deposit_holds_value() {
        let f = fixture(IntentsConfig::default());
        let vault_id = create_vault(&f).await;
        on_chain_deposit(&f, "d1", "100").await;

        let processed = f
            .service
            .submit_intention(signed(alice(), assign(&["40"], vault_id)))
            .await
            .unwrap();
        assert!(processed.has_deposit_matches());

        let holds = f.ledger.holds(&processed.hold_reference()).await;
        assert_eq!(holds.len(), 1);
        assert_eq!(
            holds[0].target_reference,
            format!("vault:{}:intention:{}", vault_id, processed.id)
        );

        let query = DepositQuery::new(alice(), Address::zero(), 1);
        assert_eq!(
            f.ledger.total_available(&query).await.unwrap(),
            Amount::parse("60").unwrap()
        );
    }

    #[tokio::test]
    async fn test_assign_deposit_is_all_or_nothing() {
        let f = fixture(IntentsConfig::default());
        let vault_id = create_vault(&f).await;
        on_chain_deposit(&f, "d1", "50").await;
        let queued_before = f.cache.len().await;

        let err = f
            .service
            .submit_intention(signed(alice(), assign(&["30", "30"], vault_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::NoMatchingDeposit { input_index: 1, .. }));
        assert_eq!(err.class(), ErrorClass::Business);

        let query = DepositQuery::new(alice(), Address::zero(), 1);
        assert_eq!(
            f.ledger.total_available(&query).await.unwrap(),
            Amount::parse("50").unwrap()
        );
        assert_eq!(f.cache.len().await, queued_before);
    }

    #[tokio::test]
    async fn test_assign_to_unknown_vault() {
        let f = fixture(IntentsConfig::default());
        on_chain_deposit(&f, "d1", "50").await;

        let err = f
            .service
            .submit_intention(signed(alice(), assign(&["10"], VaultId(99))))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::UnknownVault { vault_id: VaultId(99) }));
    }

    #[tokio::test]
    async fn test_concurrent_assignments_never_overdraw() {
        let f = fixture(IntentsConfig::default());
        let vault_id = create_vault(&f).await;
        on_chain_deposit(&f, "d1", "100").await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = f.service.clone();
                tokio::spawn(async move {
                    service
                        .submit_intention(signed(alice(), assign(&["30"], vault_id)))
                        .await
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);

        let query = DepositQuery::new(alice(), Address::zero(), 1);
        assert_eq!(
            f.ledger.total_available(&query).await.unwrap(),
            Amount::parse("10").unwrap()
        );
    }
}
