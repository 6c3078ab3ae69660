//! Tessera external bindings
//!
//! The node trusts one external chain as the source of truth for deposits
//! and vault creation, publishes bundle bytes to a content-addressed store,
//! and archives them to long-term storage. Each system sits behind an async
//! trait with an HTTP implementation and an in-memory fake.

pub mod events;
pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_types::{Address, AssetKind, BlockRange, ErrorClass, NewDeposit, VaultId};

pub use events::{encode_vault_created, parse_vault_created, VAULT_CREATED_SIGNATURE};
pub use http::{HttpArchivalStore, HttpContentStore, RelayerChainClient};
pub use memory::{InMemoryArchivalStore, InMemoryChain, InMemoryContentStore};

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by chain, storage and archival bindings
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Expected event missing from receipt {tx_hash}: {event}")]
    MissingEvent { tx_hash: String, event: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Api { status, .. } if (400..500).contains(status) && *status != 408 && *status != 429 => {
                ErrorClass::Validation
            }
            Self::MissingEvent { .. } => ErrorClass::Business,
            _ => ErrorClass::Transient,
        }
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::InvalidResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

// ============================================================================
// Chain types
// ============================================================================

/// One log entry of a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: String,
    /// `0x`-prefixed 32-byte topics; topic 0 is the event signature hash
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// A mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Events this node understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEvent {
    VaultCreated { vault_id: VaultId, controller: Address },
}

/// Answer of [`ArchivalStore::check_readiness`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Blocked { reason: String },
}

// ============================================================================
// Capabilities
// ============================================================================

/// Bindings to the chain's deposit, vault factory and anchor contracts
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Deposits of `asset` observed in `range` on `chain_id`
    async fn discover_deposits(
        &self,
        asset: &AssetKind,
        chain_id: u64,
        range: BlockRange,
    ) -> Result<Vec<NewDeposit>>;

    /// Submit a vault creation transaction and wait for its receipt
    async fn create_vault(&self, controller: &Address) -> Result<TxReceipt>;

    /// Decode the events this node understands from a receipt
    fn parse_event_logs(&self, receipt: &TxReceipt) -> Result<Vec<ChainEvent>> {
        parse_vault_created(receipt)
    }

    /// Anchor a bundle's content identifier, returning the tx hash
    async fn submit_bundle(&self, nonce: u64, content_id: &str) -> Result<String>;
}

/// Content-addressed storage
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<String>;
}

/// Receives progress of an archival upload
#[async_trait]
pub trait ArchivalCallbacks: Send + Sync {
    async fn on_tx_submitted(&self, tx_hash: String);

    async fn on_complete(&self, piece_id: String);

    async fn on_confirmed(&self);
}

/// Long-term archival storage
#[async_trait]
pub trait ArchivalStore: Send + Sync {
    async fn check_readiness(&self, size: usize) -> Result<Readiness>;

    /// Upload and report progress through `callbacks`
    ///
    /// Returns once the upload is accepted. Confirmation may arrive later,
    /// through `on_confirmed` or out of band.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_id: &str,
        callbacks: Arc<dyn ArchivalCallbacks>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let not_found = ChainError::Api {
            status: 404,
            message: "nope".to_string(),
        };
        assert_eq!(not_found.class(), ErrorClass::Validation);

        let throttled = ChainError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(throttled.class().is_retryable());

        let missing = ChainError::MissingEvent {
            tx_hash: "0x1".to_string(),
            event: "VaultCreated".to_string(),
        };
        assert_eq!(missing.class(), ErrorClass::Business);
    }

    #[test]
    fn test_readiness_wire_shape() {
        let blocked: Readiness =
            serde_json::from_str(r#"{"status":"blocked","reason":"insufficient allowance"}"#)
                .unwrap();
        assert_eq!(
            blocked,
            Readiness::Blocked {
                reason: "insufficient allowance".to_string()
            }
        );
    }
}
