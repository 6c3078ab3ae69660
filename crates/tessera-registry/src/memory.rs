//! In-memory vault registry

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use tessera_types::{Address, Vault, VaultId};

use crate::{RegistryError, Result, VaultRegistry};

/// Vault registry held entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryVaultRegistry {
    vaults: Arc<RwLock<BTreeMap<VaultId, Vault>>>,
}

impl InMemoryVaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultRegistry for InMemoryVaultRegistry {
    async fn create_vault(
        &self,
        vault_id: VaultId,
        initial_controller: &Address,
        rules: Option<String>,
    ) -> Result<Vault> {
        let mut vaults = self.vaults.write().await;
        if vaults.contains_key(&vault_id) {
            return Err(RegistryError::AlreadyExists { vault_id });
        }

        let now = Utc::now();
        let vault = Vault {
            vault_id,
            controllers: vec![initial_controller.clone()],
            rules,
            created_at: now,
            updated_at: now,
        };
        vaults.insert(vault_id, vault.clone());

        info!(vault_id = %vault_id, controller = %initial_controller, "Vault registered");
        Ok(vault)
    }

    async fn add_controller(&self, vault_id: VaultId, address: &Address) -> Result<Vec<Address>> {
        let mut vaults = self.vaults.write().await;
        let vault = vaults
            .get_mut(&vault_id)
            .ok_or(RegistryError::NotFound { vault_id })?;

        if !vault.controllers.contains(address) {
            vault.controllers.push(address.clone());
            vault.updated_at = Utc::now();
        }
        Ok(vault.controllers.clone())
    }

    async fn remove_controller(
        &self,
        vault_id: VaultId,
        address: &Address,
    ) -> Result<Vec<Address>> {
        let mut vaults = self.vaults.write().await;
        let vault = vaults
            .get_mut(&vault_id)
            .ok_or(RegistryError::NotFound { vault_id })?;

        let before = vault.controllers.len();
        vault.controllers.retain(|c| c != address);
        if vault.controllers.len() != before {
            vault.updated_at = Utc::now();
        }
        Ok(vault.controllers.clone())
    }

    async fn set_rules(&self, vault_id: VaultId, rules: Option<String>) -> Result<Option<String>> {
        let mut vaults = self.vaults.write().await;
        let vault = vaults
            .get_mut(&vault_id)
            .ok_or(RegistryError::NotFound { vault_id })?;

        vault.rules = rules;
        vault.updated_at = Utc::now();
        Ok(vault.rules.clone())
    }

    async fn get(&self, vault_id: VaultId) -> Result<Option<Vault>> {
        Ok(self.vaults.read().await.get(&vault_id).cloned())
    }

    async fn vaults_of(&self, address: &Address) -> Result<Vec<VaultId>> {
        let vaults = self.vaults.read().await;
        Ok(vaults
            .values()
            .filter(|v| v.is_controller(address))
            .map(|v| v.vault_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const BOB: &str = "0x0000000000000000000000000000000000000b0b";

    #[tokio::test]
    async fn test_create_is_unique() {
        let registry = InMemoryVaultRegistry::new();
        registry
            .create_vault(VaultId(1), &addr(ALICE), None)
            .await
            .unwrap();

        let err = registry
            .create_vault(VaultId(1), &addr(BOB), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(
            registry.controllers_of(VaultId(1)).await.unwrap(),
            vec![addr(ALICE)]
        );
    }

    #[tokio::test]
    async fn test_mutating_missing_vault() {
        let registry = InMemoryVaultRegistry::new();
        let missing = VaultId(9);

        assert!(matches!(
            registry.add_controller(missing, &addr(ALICE)).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.remove_controller(missing, &addr(ALICE)).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.set_rules(missing, Some("r".to_string())).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.get(missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_controller_normalization() {
        let registry = InMemoryVaultRegistry::new();
        registry
            .create_vault(VaultId(1), &addr(ALICE), None)
            .await
            .unwrap();

        let mixed = addr("0x0000000000000000000000000000000000000B0B");
        let controllers = registry.add_controller(VaultId(1), &mixed).await.unwrap();
        assert_eq!(controllers, vec![addr(ALICE), addr(BOB)]);
        assert_eq!(controllers[1].as_str(), BOB);

        // De-duplicated
        let again = registry.add_controller(VaultId(1), &addr(BOB)).await.unwrap();
        assert_eq!(again.len(), 2);
        assert!(registry.is_controller(VaultId(1), &mixed).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_and_rules() {
        let registry = InMemoryVaultRegistry::new();
        registry
            .create_vault(VaultId(1), &addr(ALICE), Some("limit:100".to_string()))
            .await
            .unwrap();

        let controllers = registry
            .remove_controller(VaultId(1), &addr(BOB))
            .await
            .unwrap();
        assert_eq!(controllers, vec![addr(ALICE)]);

        let controllers = registry
            .remove_controller(VaultId(1), &addr(ALICE))
            .await
            .unwrap();
        assert!(controllers.is_empty());

        assert_eq!(registry.set_rules(VaultId(1), None).await.unwrap(), None);
        assert!(registry.get(VaultId(1)).await.unwrap().unwrap().rules.is_none());
    }

    #[tokio::test]
    async fn test_vaults_of() {
        let registry = InMemoryVaultRegistry::new();
        registry.create_vault(VaultId(3), &addr(ALICE), None).await.unwrap();
        registry.create_vault(VaultId(1), &addr(ALICE), None).await.unwrap();
        registry.create_vault(VaultId(2), &addr(BOB), None).await.unwrap();

        assert_eq!(
            registry.vaults_of(&addr(ALICE)).await.unwrap(),
            vec![VaultId(1), VaultId(3)]
        );
        assert!(registry
            .vaults_of(&addr("0x0000000000000000000000000000000000000c0c"))
            .await
            .unwrap()
            .is_empty());
    }
}
