//! Proposer key management

use crate::{keccak256, CryptoError, CryptoResult};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use tessera_types::Address;

/// The key that signs every bundle this node proposes
#[derive(Clone)]
pub struct ProposerKey {
    signing_key: SigningKey,
    address: Address,
}

impl ProposerKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Create from raw private key bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Create from a hex private key, with or without `0x`
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyFormat(
                "Private key must be 32 bytes".to_string(),
            ));
        }
        Self::from_bytes(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The proposer address recorded on every bundle
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl std::fmt::Debug for ProposerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposerKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Ethereum-style address: last 20 bytes of keccak256(uncompressed pubkey)
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}
