//! Tessera Types - Canonical domain types for the intention settlement core
//!
//! This crate has zero dependencies on other tessera crates. It defines:
//!
//! - Address and exact-decimal amount types
//! - Identity types (DepositId, VaultId, IntentionId, HoldId)
//! - Deposit ledger records (deposits, assignments, holds)
//! - Vaults, intentions, proof entries
//! - Bundles and their archival lifecycle
//! - The error classification shared by every crate
//!
//! # Invariants
//!
//! 1. Addresses are always stored lowercased
//! 2. Amounts are never binary floats and never negative
//! 3. A bundled intention is immutable

pub mod address;
pub mod amount;
pub mod identity;
pub mod deposit;
pub mod vault;
pub mod intention;
pub mod bundle;
pub mod error;

pub use address::*;
pub use amount::*;
pub use identity::*;
pub use deposit::*;
pub use vault::*;
pub use intention::*;
pub use bundle::*;
pub use error::*;
