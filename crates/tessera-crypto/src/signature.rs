//! Recoverable signatures over keccak256 digests

use crate::{address_of, keccak256, CryptoError, CryptoResult, ProposerKey};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tessera_types::Address;

/// Sign a message, returning `0x`-prefixed r‖s‖v hex (v = 27 or 28)
pub fn sign_message(key: &ProposerKey, message: &[u8]) -> CryptoResult<String> {
    let digest = keccak256(message);
    let (signature, recovery_id) = key
        .signing_key()
        .sign_prehash_recoverable(&digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(&signature.to_bytes());
    bytes.push(recovery_id.to_byte() + 27);
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Recover the signer address of a message signed with [`sign_message`]
pub fn recover_signer(message: &[u8], signature_hex: &str) -> CryptoResult<Address> {
    let s = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let bytes = hex::decode(s).map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(CryptoError::VerificationFailed(
            "Signature must be 65 bytes".to_string(),
        ));
    }

    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
    let v = bytes[64];
    let recovery_id = RecoveryId::from_byte(v.checked_sub(27).unwrap_or(v))
        .ok_or_else(|| CryptoError::VerificationFailed(format!("invalid recovery byte {}", v)))?;

    let digest = keccak256(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
    Ok(address_of(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover() {
        let key = ProposerKey::generate();
        let message = b"bundle payload";

        let signature = sign_message(&key, message).unwrap();
        assert_eq!(signature.len(), 2 + 130);
        assert_eq!(&recover_signer(message, &signature).unwrap(), key.address());
    }

    #[test]
    fn test_wrong_message_recovers_other_address() {
        let key = ProposerKey::generate();
        let signature = sign_message(&key, b"one").unwrap();
        let recovered = recover_signer(b"two", &signature);
        assert!(recovered.map(|a| &a != key.address()).unwrap_or(true));
    }

    #[test]
    fn test_malformed_signature() {
        assert!(recover_signer(b"x", "0x1234").is_err());
    }
}
