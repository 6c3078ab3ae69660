//! SeedVault
//!
//! Initial grants for a new vault. Only the node produces these; the
//! submission service refuses them from outside.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use tessera_crypto::sign_message;
use tessera_types::{
    ActionKind, Intention, IntentionId, IntentionOutput, ProcessedIntention, ProofEntry,
    SignedIntention, VaultId,
};

use super::{HandlerOutput, HandlerRequest, IntentionHandler};
use crate::{HandlerContext, IntentError, Result};

pub struct SeedVaultHandler;

#[async_trait]
impl IntentionHandler for SeedVaultHandler {
    fn action(&self) -> ActionKind {
        ActionKind::SeedVault
    }

    async fn handle(&self, ctx: &HandlerContext, request: HandlerRequest<'_>) -> Result<HandlerOutput> {
        let intention = &request.signed.intention;
        if intention.outputs.is_empty() {
            return Err(IntentError::invalid("seed_vault needs at least one grant"));
        }

        let mut proofs = Vec::with_capacity(intention.outputs.len());
        for output in &intention.outputs {
            if !output.amount.is_positive() {
                return Err(IntentError::invalid(format!(
                    "grant of {} must be positive",
                    output.asset
                )));
            }
            if ctx.registry.get(output.vault_id).await?.is_none() {
                return Err(IntentError::UnknownVault {
                    vault_id: output.vault_id,
                });
            }
            proofs.push(ProofEntry::Grant {
                vault_id: output.vault_id,
                asset: output.asset.clone(),
                amount: output.amount,
            });
        }
        Ok(HandlerOutput::proofs(proofs))
    }
}

/// Builds the node-signed seeding intention for a new vault
pub struct Seeder;

impl Seeder {
    /// `None` when no grants are configured
    pub async fn seed(ctx: &HandlerContext, vault_id: VaultId) -> Result<Option<ProcessedIntention>> {
        if ctx.config.seed_grants.is_empty() {
            return Ok(None);
        }

        let intention = Intention {
            action: ActionKind::SeedVault,
            nonce: vault_id.0,
            inputs: Vec::new(),
            outputs: ctx
                .config
                .seed_grants
                .iter()
                .map(|g| IntentionOutput {
                    asset: g.asset.clone(),
                    amount: g.amount,
                    vault_id,
                })
                .collect(),
            vault_id: Some(vault_id),
            update: None,
            rules: None,
        };
        let bytes = serde_json::to_vec(&intention).map_err(|e| IntentError::invalid(e.to_string()))?;
        let signed = SignedIntention {
            signature: sign_message(&ctx.node_key, &bytes)?,
            controller: ctx.node_key.address().clone(),
            intention,
        };

        let id = IntentionId::new();
        let output = SeedVaultHandler
            .handle(ctx, HandlerRequest { id, signed: &signed })
            .await?;
        info!(vault_id = %vault_id, grants = output.proofs.len(), "Vault seeding prepared");

        Ok(Some(ProcessedIntention {
            id,
            action: ActionKind::SeedVault,
            controller: signed.controller,
            signature: signed.signature,
            intention: signed.intention,
            proofs: output.proofs,
            received_at: Utc::now(),
        }))
    }
}
