//! Intention processing errors

use thiserror::Error;

use tessera_chain::ChainError;
use tessera_crypto::CryptoError;
use tessera_ledger::LedgerError;
use tessera_registry::RegistryError;
use tessera_sequencer::SequencerError;
use tessera_types::{ActionKind, Address, Amount, ErrorClass, VaultId};

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("Invalid intention: {0}")]
    Invalid(String),

    #[error("{action} intentions cannot be submitted externally")]
    InternalAction { action: ActionKind },

    #[error("Address {controller} does not control vault {vault_id}")]
    NotController { controller: Address, vault_id: VaultId },

    #[error("Vault not found: {vault_id}")]
    UnknownVault { vault_id: VaultId },

    #[error("No deposit covers input {input_index}: requested {requested}, available {available}")]
    NoMatchingDeposit {
        input_index: usize,
        requested: Amount,
        available: Amount,
    },

    #[error("Deposit matching for input {input_index} kept losing races after {attempts} attempts")]
    Contended { input_index: usize, attempts: u32 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),
}

impl IntentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Invalid(_)
            | Self::InternalAction { .. }
            | Self::NotController { .. }
            | Self::UnknownVault { .. } => ErrorClass::Validation,
            Self::NoMatchingDeposit { .. } => ErrorClass::Business,
            Self::Contended { .. } => ErrorClass::Transient,
            Self::Ledger(e) => e.class(),
            Self::Registry(e) => e.class(),
            Self::Chain(e) => e.class(),
            Self::Sequencer(e) => e.class(),
            Self::Signing(_) => ErrorClass::FatalConfig,
        }
    }
}

pub type Result<T> = std::result::Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(
            IntentError::InternalAction {
                action: ActionKind::SeedVault
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(
            IntentError::NoMatchingDeposit {
                input_index: 0,
                requested: Amount::zero(),
                available: Amount::zero(),
            }
            .class(),
            ErrorClass::Business
        );
        let err: IntentError = RegistryError::AlreadyExists {
            vault_id: VaultId(1),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Conflict);
    }
}
