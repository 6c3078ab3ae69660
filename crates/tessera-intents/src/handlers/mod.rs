//! Per-action intention handlers

mod assign;
mod seed;
mod vault;

pub use assign::AssignDepositHandler;
pub use seed::{SeedVaultHandler, Seeder};
pub use vault::{CreateVaultHandler, UpdateVaultHandler};

use async_trait::async_trait;

use tessera_types::{ActionKind, IntentionId, ProcessedIntention, ProofEntry, SignedIntention};

use crate::{HandlerContext, Result};

/// What a handler is asked to process
pub struct HandlerRequest<'a> {
    /// Id the processed intention will carry
    pub id: IntentionId,
    pub signed: &'a SignedIntention,
}

/// What a handler produced
#[derive(Debug, Default)]
pub struct HandlerOutput {
    pub proofs: Vec<ProofEntry>,
    /// Intentions the node derived from this one, queued right after it
    pub follow_ups: Vec<ProcessedIntention>,
}

impl HandlerOutput {
    pub fn proofs(proofs: Vec<ProofEntry>) -> Self {
        Self {
            proofs,
            follow_ups: Vec::new(),
        }
    }
}

#[async_trait]
pub trait IntentionHandler: Send + Sync {
    fn action(&self) -> ActionKind;

    async fn handle(&self, ctx: &HandlerContext, request: HandlerRequest<'_>) -> Result<HandlerOutput>;
}
