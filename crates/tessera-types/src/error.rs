//! Error types shared across Tessera
//!
//! Every crate keeps its own error enum; each one maps onto an [`ErrorClass`]
//! so callers can decide between rejecting, swallowing and retrying.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for type-level parsing
pub type Result<T> = std::result::Result<T, TypesError>;

/// Parsing and validation errors for the foundational types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    #[error("Unknown archival status: {0}")]
    UnknownArchivalStatus(String),
}

/// How an error should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input. Rejected, never retried.
    Validation,
    /// Business rejection such as no matching deposit or insufficient funds.
    Business,
    /// Duplicate write. Swallowed, the operation is idempotent.
    Conflict,
    /// Database, chain, storage or network hiccup.
    Transient,
    /// Missing required configuration. Only raised at startup.
    FatalConfig,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Business => "business",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::FatalConfig => "fatal_config",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(!ErrorClass::Business.is_retryable());
        assert!(!ErrorClass::Conflict.is_retryable());
        assert!(!ErrorClass::FatalConfig.is_retryable());
    }
}
