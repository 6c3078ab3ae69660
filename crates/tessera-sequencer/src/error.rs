//! Sequencer error types

use std::fmt;

use tessera_chain::ChainError;
use tessera_crypto::CryptoError;
use tessera_ledger::LedgerError;
use tessera_types::ErrorClass;
use thiserror::Error;

/// Pipeline step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Upload,
    Anchor,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Anchor => f.write_str("anchor"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("A bundle cycle is already running")]
    Busy,

    #[error("Nonce {nonce} is already taken")]
    DuplicateNonce { nonce: u64 },

    #[error("Bundle not found: nonce {nonce}")]
    BundleNotFound { nonce: u64 },

    #[error("Bundle store error: {message}")]
    Store { message: String },

    #[error("Deposit holds of {bundles} bundle(s) are still unsettled")]
    UnsettledHolds { bundles: usize },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publishing bundle {nonce} failed at {stage}: {source}")]
    Publish {
        nonce: u64,
        stage: PublishStage,
        #[source]
        source: ChainError,
    },
}

impl SequencerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Busy | Self::DuplicateNonce { .. } => ErrorClass::Conflict,
            Self::BundleNotFound { .. } | Self::Serialization(_) => ErrorClass::Validation,
            Self::Store { .. } | Self::Publish { .. } | Self::UnsettledHolds { .. } => {
                ErrorClass::Transient
            }
            Self::Ledger(e) => e.class(),
            Self::Signing(_) => ErrorClass::FatalConfig,
        }
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;
