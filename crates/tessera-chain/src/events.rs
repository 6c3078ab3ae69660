//! Receipt log decoding for the vault factory

use tessera_crypto::keccak256_hex;
use tessera_types::{Address, VaultId};

use crate::{ChainError, ChainEvent, LogEntry, Result, TxReceipt};

/// `event VaultCreated(uint256 indexed vaultId, address indexed controller)`
pub const VAULT_CREATED_SIGNATURE: &str = "VaultCreated(uint256,address)";

fn vault_created_topic() -> String {
    keccak256_hex(VAULT_CREATED_SIGNATURE.as_bytes())
}

/// Build the log a vault factory emits for a new vault
pub fn encode_vault_created(contract: &str, vault_id: VaultId, controller: &Address) -> LogEntry {
    let controller_hex = controller.as_str().trim_start_matches("0x");
    LogEntry {
        address: contract.to_string(),
        topics: vec![
            vault_created_topic(),
            format!("0x{:064x}", vault_id.0),
            format!("0x{:0>64}", controller_hex),
        ],
        data: "0x".to_string(),
    }
}

/// Extract every `VaultCreated` event from a receipt, in log order
pub fn parse_vault_created(receipt: &TxReceipt) -> Result<Vec<ChainEvent>> {
    let topic0 = vault_created_topic();
    receipt
        .logs
        .iter()
        .filter(|log| log.topics.first().map(|t| t.to_lowercase()) == Some(topic0.clone()))
        .map(decode_vault_created)
        .collect()
}

fn decode_vault_created(log: &LogEntry) -> Result<ChainEvent> {
    if log.topics.len() < 3 {
        return Err(ChainError::InvalidResponse(format!(
            "VaultCreated log has {} topics",
            log.topics.len()
        )));
    }

    let id_word = word(&log.topics[1])?;
    let (high, low) = id_word.split_at(48);
    if high.chars().any(|c| c != '0') {
        return Err(ChainError::InvalidResponse(format!(
            "vault id {} exceeds 64 bits",
            log.topics[1]
        )));
    }
    let vault_id = u64::from_str_radix(low, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("vault id: {}", e)))?;

    let controller_word = word(&log.topics[2])?;
    let controller = Address::parse(&format!("0x{}", &controller_word[24..]))
        .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

    Ok(ChainEvent::VaultCreated {
        vault_id: VaultId(vault_id),
        controller,
    })
}

/// A 32-byte topic as 64 lowercase hex chars
fn word(topic: &str) -> Result<String> {
    let hex = topic.trim_start_matches("0x").to_lowercase();
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::InvalidResponse(format!("malformed topic {}", topic)));
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Address {
        Address::parse("0x00000000000000000000000000000000000a11ce").unwrap()
    }

    #[test]
    fn test_decode_encoded_log() {
        let receipt = TxReceipt {
            tx_hash: "0xfeed".to_string(),
            block_number: Some(10),
            logs: vec![
                LogEntry {
                    address: "0xfactory".to_string(),
                    topics: vec![keccak256_hex(b"Transfer(address,address,uint256)")],
                    data: "0x".to_string(),
                },
                encode_vault_created("0xfactory", VaultId(42), &controller()),
            ],
        };

        let events = parse_vault_created(&receipt).unwrap();
        assert_eq!(
            events,
            vec![ChainEvent::VaultCreated {
                vault_id: VaultId(42),
                controller: controller(),
            }]
        );
    }

    #[test]
    fn test_receipt_without_event() {
        let receipt = TxReceipt {
            tx_hash: "0xfeed".to_string(),
            block_number: None,
            logs: Vec::new(),
        };
        assert!(parse_vault_created(&receipt).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_topic() {
        let mut log = encode_vault_created("0xfactory", VaultId(1), &controller());
        log.topics[1] = "0x12".to_string();
        let receipt = TxReceipt {
            tx_hash: "0xfeed".to_string(),
            block_number: None,
            logs: vec![log],
        };
        assert!(parse_vault_created(&receipt).is_err());
    }
}
