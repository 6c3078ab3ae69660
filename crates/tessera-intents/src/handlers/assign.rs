//! AssignDeposit
//!
//! Pairs input `i` with output `i`. Each input is matched against the
//! submitter's oldest deposit with enough free value, and that value is held
//! for the output vault until the bundle is persisted. Matching is
//! all-or-nothing: if any input fails, every hold placed so far is released.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tessera_ledger::LedgerError;
use tessera_types::{
    ActionKind, Address, Amount, DepositId, DepositQuery, Intention, IntentionId,
    IntentionInput, ProofEntry, VaultId,
};

use super::{HandlerOutput, HandlerRequest, IntentionHandler};
use crate::{HandlerContext, IntentError, Result};

pub struct AssignDepositHandler;

/// Target reference recorded on holds and the assignments they become
pub fn assignment_target(vault_id: VaultId, intention_id: &IntentionId) -> String {
    format!("vault:{}:intention:{}", vault_id, intention_id)
}

fn validate(intention: &Intention) -> Result<()> {
    if intention.inputs.is_empty() {
        return Err(IntentError::invalid("assign_deposit needs at least one input"));
    }
    if intention.inputs.len() != intention.outputs.len() {
        return Err(IntentError::invalid(format!(
            "{} inputs but {} outputs",
            intention.inputs.len(),
            intention.outputs.len()
        )));
    }

    for (i, (input, output)) in intention.inputs.iter().zip(&intention.outputs).enumerate() {
        if !input.amount.is_positive() {
            return Err(IntentError::invalid(format!("input {} amount must be positive", i)));
        }
        if input.chain_id == 0 {
            return Err(IntentError::invalid(format!("input {} has no chain id", i)));
        }
        if input.asset != output.asset {
            return Err(IntentError::invalid(format!(
                "input {} asset {} does not match output asset {}",
                i, input.asset, output.asset
            )));
        }
        if input.amount != output.amount {
            return Err(IntentError::invalid(format!(
                "input {} amount {} does not match output amount {}",
                i, input.amount, output.amount
            )));
        }
    }
    Ok(())
}

impl AssignDepositHandler {
    async fn match_all(
        &self,
        ctx: &HandlerContext,
        request: &HandlerRequest<'_>,
        reference: &str,
    ) -> Result<Vec<ProofEntry>> {
        let intention = &request.signed.intention;
        let mut proofs = Vec::with_capacity(intention.inputs.len());

        for (input_index, (input, output)) in
            intention.inputs.iter().zip(&intention.outputs).enumerate()
        {
            ctx.discovery
                .scan(&input.asset_kind(), input.chain_id, input.block_range())
                .await?;

            let target = assignment_target(output.vault_id, &request.id);
            let deposit_id = match_input(
                ctx,
                &request.signed.controller,
                input,
                input_index,
                reference,
                &target,
            )
            .await?;

            proofs.push(ProofEntry::DepositMatch {
                input_index,
                deposit_id,
                amount: input.amount,
                vault_id: output.vault_id,
            });
        }
        Ok(proofs)
    }
}

/// Hold `input.amount` on the oldest sufficient deposit, re-querying when a
/// concurrent intention takes the value first
async fn match_input(
    ctx: &HandlerContext,
    depositor: &Address,
    input: &IntentionInput,
    input_index: usize,
    reference: &str,
    target: &str,
) -> Result<DepositId> {
    let query = DepositQuery::new(depositor.clone(), input.asset.clone(), input.chain_id);
    let attempts = ctx.config.hold_attempts.max(1);

    for attempt in 1..=attempts {
        let Some(deposit) = ctx
            .ledger
            .find_with_sufficient_remaining(&query, input.amount)
            .await?
        else {
            let available: Amount = ctx.ledger.total_available(&query).await?;
            return Err(IntentError::NoMatchingDeposit {
                input_index,
                requested: input.amount,
                available,
            });
        };

        match ctx.ledger.hold(deposit.id, input.amount, reference, target).await {
            Ok(hold) => {
                debug!(
                    deposit_id = %deposit.id,
                    hold_id = %hold.id,
                    amount = %input.amount,
                    "Deposit held"
                );
                return Ok(deposit.id);
            }
            Err(LedgerError::InsufficientRemaining { .. }) => {
                debug!(deposit_id = %deposit.id, attempt, "Lost hold race, re-querying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(IntentError::Contended {
        input_index,
        attempts,
    })
}

#[async_trait]
impl IntentionHandler for AssignDepositHandler {
    fn action(&self) -> ActionKind {
        ActionKind::AssignDeposit
    }

    async fn handle(&self, ctx: &HandlerContext, request: HandlerRequest<'_>) -> Result<HandlerOutput> {
        let intention = &request.signed.intention;
        validate(intention)?;

        for output in &intention.outputs {
            if ctx.registry.get(output.vault_id).await?.is_none() {
                return Err(IntentError::UnknownVault {
                    vault_id: output.vault_id,
                });
            }
        }

        let reference = tessera_types::hold_reference(&request.id);
        match self.match_all(ctx, &request, &reference).await {
            Ok(proofs) => {
                info!(
                    intention_id = %request.id,
                    controller = %request.signed.controller,
                    inputs = proofs.len(),
                    "Deposits matched"
                );
                Ok(HandlerOutput::proofs(proofs))
            }
            Err(e) => {
                match ctx.ledger.release_holds(&reference).await {
                    Ok(released) if released > 0 => {
                        debug!(intention_id = %request.id, released, "Holds released");
                    }
                    Ok(_) => {}
                    Err(release_err) => {
                        warn!(intention_id = %request.id, error = %release_err, "Failed to release holds");
                    }
                }
                Err(e)
            }
        }
    }
}
