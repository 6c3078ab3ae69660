//! PostgreSQL-backed vault registry

use async_trait::async_trait;
use tracing::info;

use tessera_db::{DbError, VaultRepo};
use tessera_types::{Address, Vault, VaultId};

use crate::{RegistryError, Result, VaultRegistry};

/// Vault registry persisted through [`VaultRepo`]
pub struct PgVaultRegistry {
    repo: VaultRepo,
}

impl PgVaultRegistry {
    pub fn new(repo: VaultRepo) -> Self {
        Self { repo }
    }
}

fn db_id(vault_id: VaultId) -> Result<i64> {
    i64::try_from(vault_id.0).map_err(|_| RegistryError::Database {
        message: format!("vault id {} out of range", vault_id),
    })
}

fn parse_controllers(raw: Vec<String>) -> Result<Vec<Address>> {
    raw.iter()
        .map(|c| {
            Address::parse(c).map_err(|e| RegistryError::Database {
                message: e.to_string(),
            })
        })
        .collect()
}

fn map_missing(vault_id: VaultId) -> impl FnOnce(DbError) -> RegistryError {
    move |e| match e {
        DbError::NotFound(_) => RegistryError::NotFound { vault_id },
        DbError::Duplicate(_) => RegistryError::AlreadyExists { vault_id },
        other => other.into(),
    }
}

#[async_trait]
impl VaultRegistry for PgVaultRegistry {
    async fn create_vault(
        &self,
        vault_id: VaultId,
        initial_controller: &Address,
        rules: Option<String>,
    ) -> Result<Vault> {
        let row = self
            .repo
            .create(db_id(vault_id)?, initial_controller.as_str(), rules.as_deref())
            .await
            .map_err(map_missing(vault_id))?;

        info!(vault_id = %vault_id, controller = %initial_controller, "Vault registered");
        Ok(Vault::try_from(row)?)
    }

    async fn add_controller(&self, vault_id: VaultId, address: &Address) -> Result<Vec<Address>> {
        let raw = self
            .repo
            .add_controller(db_id(vault_id)?, address.as_str())
            .await
            .map_err(map_missing(vault_id))?;
        parse_controllers(raw)
    }

    async fn remove_controller(
        &self,
        vault_id: VaultId,
        address: &Address,
    ) -> Result<Vec<Address>> {
        let raw = self
            .repo
            .remove_controller(db_id(vault_id)?, address.as_str())
            .await
            .map_err(map_missing(vault_id))?;
        parse_controllers(raw)
    }

    async fn set_rules(&self, vault_id: VaultId, rules: Option<String>) -> Result<Option<String>> {
        self.repo
            .set_rules(db_id(vault_id)?, rules.as_deref())
            .await
            .map_err(map_missing(vault_id))
    }

    async fn get(&self, vault_id: VaultId) -> Result<Option<Vault>> {
        let row = self.repo.find(db_id(vault_id)?).await?;
        Ok(row.map(Vault::try_from).transpose()?)
    }

    async fn vaults_of(&self, address: &Address) -> Result<Vec<VaultId>> {
        let ids = self.repo.vaults_of(address.as_str()).await?;
        Ok(ids
            .into_iter()
            .filter_map(|id| u64::try_from(id).ok())
            .map(VaultId)
            .collect())
    }
}
