//! Tessera Vault Registry
//!
//! Maps a vault id to the addresses allowed to act for it and an optional
//! rule string. Vaults are only ever created by mirroring an on-chain
//! creation event; controllers and rules are only mutated on vaults that
//! already exist.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use tessera_db::DbError;
use tessera_types::{Address, ErrorClass, Vault, VaultId};

pub use memory::InMemoryVaultRegistry;
pub use postgres::PgVaultRegistry;

/// Errors that can occur in registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Vault already exists: {vault_id}")]
    AlreadyExists { vault_id: VaultId },

    #[error("Vault not found: {vault_id}")]
    NotFound { vault_id: VaultId },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyExists { .. } => ErrorClass::Conflict,
            Self::NotFound { .. } => ErrorClass::Validation,
            Self::Database { .. } => ErrorClass::Transient,
        }
    }
}

impl From<DbError> for RegistryError {
    fn from(e: DbError) -> Self {
        RegistryError::Database {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Vault registry capability
#[async_trait]
pub trait VaultRegistry: Send + Sync {
    /// Insert-only; fails with `AlreadyExists` if the id is taken
    async fn create_vault(
        &self,
        vault_id: VaultId,
        initial_controller: &Address,
        rules: Option<String>,
    ) -> Result<Vault>;

    /// Add a controller if absent, returning the resulting set
    async fn add_controller(&self, vault_id: VaultId, address: &Address) -> Result<Vec<Address>>;

    /// Remove a controller; removing a non-member is a no-op
    async fn remove_controller(&self, vault_id: VaultId, address: &Address)
        -> Result<Vec<Address>>;

    /// Replace the rule string wholesale
    async fn set_rules(&self, vault_id: VaultId, rules: Option<String>) -> Result<Option<String>>;

    async fn get(&self, vault_id: VaultId) -> Result<Option<Vault>>;

    /// Vault ids the address controls, ascending
    async fn vaults_of(&self, address: &Address) -> Result<Vec<VaultId>>;

    async fn controllers_of(&self, vault_id: VaultId) -> Result<Vec<Address>> {
        self.get(vault_id)
            .await?
            .map(|v| v.controllers)
            .ok_or(RegistryError::NotFound { vault_id })
    }

    async fn is_controller(&self, vault_id: VaultId, address: &Address) -> Result<bool> {
        Ok(self
            .get(vault_id)
            .await?
            .map(|v| v.is_controller(address))
            .unwrap_or(false))
    }
}
