//! CreateVault and UpdateVault
//!
//! The chain decides vault ids. Creation submits the factory transaction,
//! reads the id back from the receipt's `VaultCreated` log and only then
//! mirrors the vault locally.

use async_trait::async_trait;
use tracing::{info, warn};

use tessera_chain::{ChainError, ChainEvent};
use tessera_types::{ActionKind, ProofEntry, SeedingOutcome, VaultUpdate};

use super::{HandlerOutput, HandlerRequest, IntentionHandler, Seeder};
use crate::{HandlerContext, IntentError, Result};

pub struct CreateVaultHandler;

#[async_trait]
impl IntentionHandler for CreateVaultHandler {
    fn action(&self) -> ActionKind {
        ActionKind::CreateVault
    }

    async fn handle(&self, ctx: &HandlerContext, request: HandlerRequest<'_>) -> Result<HandlerOutput> {
        let controller = &request.signed.controller;
        let receipt = ctx.chain.create_vault(controller).await?;

        let vault_id = ctx
            .chain
            .parse_event_logs(&receipt)?
            .into_iter()
            .find_map(|event| match event {
                ChainEvent::VaultCreated { vault_id, .. } => Some(vault_id),
            })
            .ok_or_else(|| ChainError::MissingEvent {
                tx_hash: receipt.tx_hash.clone(),
                event: "VaultCreated".to_string(),
            })?;

        let vault = ctx
            .registry
            .create_vault(vault_id, controller, request.signed.intention.rules.clone())
            .await?;
        info!(vault_id = %vault.vault_id, controller = %controller, tx_hash = %receipt.tx_hash, "Vault created");

        let mut output = HandlerOutput::default();
        let seeding = match Seeder::seed(ctx, vault_id).await {
            Ok(Some(seed)) => {
                let intention_id = seed.id;
                output.follow_ups.push(seed);
                SeedingOutcome::Seeded { intention_id }
            }
            Ok(None) => SeedingOutcome::Skipped,
            Err(e) => {
                warn!(vault_id = %vault_id, error = %e, "Vault seeding failed");
                SeedingOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        output.proofs.push(ProofEntry::VaultCreated {
            vault_id,
            tx_hash: receipt.tx_hash,
            seeding,
        });
        Ok(output)
    }
}

pub struct UpdateVaultHandler;

#[async_trait]
impl IntentionHandler for UpdateVaultHandler {
    fn action(&self) -> ActionKind {
        ActionKind::UpdateVault
    }

    async fn handle(&self, ctx: &HandlerContext, request: HandlerRequest<'_>) -> Result<HandlerOutput> {
        let intention = &request.signed.intention;
        let controller = &request.signed.controller;
        let vault_id = intention
            .vault_id
            .ok_or_else(|| IntentError::invalid("update_vault needs a vault_id"))?;
        let update = intention
            .update
            .as_ref()
            .ok_or_else(|| IntentError::invalid("update_vault needs an update"))?;

        let vault = ctx
            .registry
            .get(vault_id)
            .await?
            .ok_or(IntentError::UnknownVault { vault_id })?;
        if !vault.is_controller(controller) {
            return Err(IntentError::NotController {
                controller: controller.clone(),
                vault_id,
            });
        }

        let (controllers, rules) = match update {
            VaultUpdate::AddController { address } => {
                (ctx.registry.add_controller(vault_id, address).await?, vault.rules)
            }
            VaultUpdate::RemoveController { address } => {
                (ctx.registry.remove_controller(vault_id, address).await?, vault.rules)
            }
            VaultUpdate::SetRules { rules } => (
                vault.controllers,
                ctx.registry.set_rules(vault_id, rules.clone()).await?,
            ),
        };
        info!(vault_id = %vault_id, controller = %controller, "Vault updated");

        Ok(HandlerOutput::proofs(vec![ProofEntry::VaultUpdated {
            vault_id,
            controllers,
            rules,
        }]))
    }
}
