//! Chain addresses
//!
//! Addresses are 20-byte hex strings, normalized to lowercase at every
//! boundary so that comparisons never depend on checksum casing.

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The zero address, used to denote the chain's native asset
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A lowercased `0x`-prefixed 20-byte address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidAddress(format!("missing 0x prefix: {}", s)))?;

        if hex_part.len() != 40 {
            return Err(TypesError::InvalidAddress(format!(
                "expected 40 hex characters, got {}",
                hex_part.len()
            )));
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidAddress(format!("non-hex characters in {}", s)));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Build an address from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// The zero address (native asset marker)
    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Asset classification: the zero address is the native asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum AssetKind {
    Native,
    Token(Address),
}

impl AssetKind {
    pub fn classify(asset: &Address) -> Self {
        if asset.is_zero() {
            Self::Native
        } else {
            Self::Token(asset.clone())
        }
    }

    /// The ledger key for this asset
    pub fn address(&self) -> Address {
        match self {
            Self::Native => Address::zero(),
            Self::Token(address) => address.clone(),
        }
    }
}
