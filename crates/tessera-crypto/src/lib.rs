//! Tessera Crypto - Cryptographic primitives for the settlement core
//!
//! This crate provides:
//! - Proposer key management (secp256k1)
//! - Ethereum-style address derivation
//! - Recoverable bundle signatures over keccak256 digests
//! - Content hashing (SHA-256, keccak256)
//!
//! # Security Invariant
//!
//! **The proposer's private key is never serialized or logged.**

pub mod keys;
pub mod signature;
pub mod hash;

pub use keys::*;
pub use signature::*;
pub use hash::*;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
