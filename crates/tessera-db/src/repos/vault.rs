//! Vault registry repository

use sqlx::PgPool;

use crate::{DbError, DbResult, DbVault};

/// Vault repository
pub struct VaultRepo {
    pool: PgPool,
}

impl VaultRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a vault; fails with `Duplicate` if the id is taken
    pub async fn create(
        &self,
        vault_id: i64,
        controller: &str,
        rules: Option<&str>,
    ) -> DbResult<DbVault> {
        let vault = sqlx::query_as::<_, DbVault>(
            r#"
            INSERT INTO vaults (vault_id, controllers, rules)
            VALUES ($1, ARRAY[$2], $3)
            ON CONFLICT (vault_id) DO NOTHING
            RETURNING vault_id, controllers, rules, created_at, updated_at
            "#,
        )
        .bind(vault_id)
        .bind(controller)
        .bind(rules)
        .fetch_optional(&self.pool)
        .await?;

        vault.ok_or_else(|| DbError::Duplicate(format!("vault {}", vault_id)))
    }

    pub async fn find(&self, vault_id: i64) -> DbResult<Option<DbVault>> {
        let vault = sqlx::query_as::<_, DbVault>(
            "SELECT vault_id, controllers, rules, created_at, updated_at FROM vaults WHERE vault_id = $1",
        )
        .bind(vault_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vault)
    }

    /// Add a controller if absent, returning the resulting set
    pub async fn add_controller(&self, vault_id: i64, controller: &str) -> DbResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let vault = sqlx::query_as::<_, DbVault>(
            "SELECT vault_id, controllers, rules, created_at, updated_at FROM vaults WHERE vault_id = $1 FOR UPDATE",
        )
        .bind(vault_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("vault {}", vault_id)))?;

        if vault.controllers.iter().any(|c| c == controller) {
            return Ok(vault.controllers);
        }

        let controllers = sqlx::query_scalar::<_, Vec<String>>(
            r#"
            UPDATE vaults
            SET controllers = array_append(controllers, $2), updated_at = NOW()
            WHERE vault_id = $1
            RETURNING controllers
            "#,
        )
        .bind(vault_id)
        .bind(controller)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(controllers)
    }

    /// Remove a controller, returning the resulting set. Removing a non-member is a no-op.
    pub async fn remove_controller(&self, vault_id: i64, controller: &str) -> DbResult<Vec<String>> {
        let controllers = sqlx::query_scalar::<_, Vec<String>>(
            r#"
            UPDATE vaults
            SET controllers = array_remove(controllers, $2), updated_at = NOW()
            WHERE vault_id = $1
            RETURNING controllers
            "#,
        )
        .bind(vault_id)
        .bind(controller)
        .fetch_optional(&self.pool)
        .await?;

        controllers.ok_or_else(|| DbError::NotFound(format!("vault {}", vault_id)))
    }

    /// Replace the rule string wholesale
    pub async fn set_rules(&self, vault_id: i64, rules: Option<&str>) -> DbResult<Option<String>> {
        let updated = sqlx::query_as::<_, DbVault>(
            r#"
            UPDATE vaults
            SET rules = $2, updated_at = NOW()
            WHERE vault_id = $1
            RETURNING vault_id, controllers, rules, created_at, updated_at
            "#,
        )
        .bind(vault_id)
        .bind(rules)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("vault {}", vault_id)))?;

        Ok(updated.rules)
    }

    /// Vault ids the address controls, ascending
    pub async fn vaults_of(&self, controller: &str) -> DbResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT vault_id FROM vaults WHERE $1 = ANY(controllers) ORDER BY vault_id",
        )
        .bind(controller)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
