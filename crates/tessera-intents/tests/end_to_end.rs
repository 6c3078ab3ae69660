//! Intention submission through to an anchored, archived bundle

use std::sync::Arc;

use tessera_chain::{InMemoryArchivalStore, InMemoryChain, InMemoryContentStore};
use tessera_crypto::{recover_signer, ProposerKey};
use tessera_intents::{HandlerContext, IntentsConfig, IntentionService, SeedGrant};
use tessera_ledger::{DepositLedger, InMemoryDepositLedger};
use tessera_registry::InMemoryVaultRegistry;
use tessera_sequencer::{
    BundleSequencer, CycleOutcome, InMemoryBundleStore, IntentionCache, PublishPipeline,
    SequencerConfig,
};
use tessera_types::{
    ActionKind, Address, Amount, ArchivalStatus, DepositQuery, Intention,
    IntentionInput, IntentionOutput, NewDeposit, ProofEntry, SignedIntention, VaultId,
};

struct Node {
    service: IntentionService,
    sequencer: BundleSequencer,
    ledger: InMemoryDepositLedger,
    chain: InMemoryChain,
    archival: InMemoryArchivalStore,
}

async fn node() -> Node {
    let cache = IntentionCache::new();
    let store = InMemoryBundleStore::new();
    let ledger = InMemoryDepositLedger::new();
    let chain = InMemoryChain::new();
    let content = InMemoryContentStore::new();
    let archival = InMemoryArchivalStore::new();
    archival.set_auto_confirm(true);
    let key = ProposerKey::generate();

    let ctx = HandlerContext::new(
        Arc::new(ledger.clone()),
        Arc::new(InMemoryVaultRegistry::new()),
        Arc::new(chain.clone()),
        key.clone(),
        IntentsConfig {
            seed_grants: vec![SeedGrant {
                asset: Address::zero(),
                amount: Amount::parse("1").unwrap(),
            }],
            ..Default::default()
        },
    );
    let service = IntentionService::new(ctx, cache.clone(), Arc::new(store.clone()));

    let pipeline = PublishPipeline::new(
        Arc::new(store.clone()),
        Arc::new(content),
        Arc::new(chain.clone()),
    )
    .with_archival(Arc::new(archival.clone()));
    let sequencer = BundleSequencer::load(
        cache,
        Arc::new(store),
        Arc::new(ledger.clone()),
        pipeline,
        key,
        SequencerConfig::default(),
    )
    .await
    .unwrap();

    Node {
        service,
        sequencer,
        ledger,
        chain,
        archival,
    }
}

fn user() -> Address {
    Address::parse("0x00000000000000000000000000000000000000c3").unwrap()
}

fn intention(action: ActionKind) -> Intention {
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

fn signed(intention: Intention) -> SignedIntention {
    SignedIntention {
        intention,
        controller: user(),
        signature: "0xsig".to_string(),
    }
}

#[tokio::test]
async fn test_intention_to_archived_bundle() {
    let node = node().await;

    let created = node
        .service
        .submit_intention(signed(intention(ActionKind::CreateVault)))
        .await
        .unwrap();
    let vault_id = match &created.proofs[0] {
        ProofEntry::VaultCreated { vault_id, .. } => *vault_id,
        other => panic!("unexpected proof {:?}", other),
    };
    assert_eq!(vault_id, VaultId(1));

    node.chain
        .push_deposit(
            120,
            NewDeposit {
                tx_hash: "0xfeed".to_string(),
                transfer_uid: "0xfeed:0".to_string(),
                chain_id: 1,
                depositor: user(),
                token: Address::zero(),
                amount: Amount::parse("700").unwrap(),
            },
        )
        .await;

    let mut assign = intention(ActionKind::AssignDeposit);
    assign.inputs.push(IntentionInput {
        asset: Address::zero(),
        amount: Amount::parse("650").unwrap(),
        chain_id: 1,
        from_block: Some(100),
        to_block: Some(200),
    });
    assign.outputs.push(IntentionOutput {
        asset: Address::zero(),
        amount: Amount::parse("650").unwrap(),
        vault_id,
    });
    let assigned = node.service.submit_intention(signed(assign)).await.unwrap();

    let outcome = node.sequencer.run_cycle().await.unwrap();
    let nonce = match outcome {
        CycleOutcome::Published {
            nonce, intentions, ..
        } => {
            assert_eq!(intentions, 3);
            nonce
        }
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(nonce, 1);
    assert!(node.sequencer.shutdown().await);

    let bundle = node.service.get_bundle_by_nonce(1).await.unwrap().unwrap();
    assert!(bundle.is_published());
    assert_eq!(bundle.archival_status, ArchivalStatus::Confirmed);
    assert_eq!(node.archival.uploads().await.len(), 1);
    assert_eq!(
        recover_signer(bundle.payload.as_bytes(), &bundle.signature).unwrap(),
        bundle.proposer
    );

    let payload = bundle.decode_payload().unwrap();
    let actions: Vec<ActionKind> = payload.intentions.iter().map(|i| i.action).collect();
    assert_eq!(
        actions,
        vec![ActionKind::CreateVault, ActionKind::SeedVault, ActionKind::AssignDeposit]
    );
    assert_eq!(payload.intentions[2].id, assigned.id);

    let deposit_id = match &assigned.proofs[0] {
        ProofEntry::DepositMatch { deposit_id, .. } => *deposit_id,
        other => panic!("unexpected proof {:?}", other),
    };
    assert_eq!(
        node.ledger.remaining(deposit_id).await.unwrap(),
        Amount::parse("50").unwrap()
    );
    let query = DepositQuery::new(user(), Address::zero(), 1);
    assert_eq!(
        node.ledger.total_available(&query).await.unwrap(),
        Amount::parse("50").unwrap()
    );

    let listed = node.service.list_bundles(10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(matches!(
        node.sequencer.run_cycle().await.unwrap(),
        CycleOutcome::Skipped
    ));
}
