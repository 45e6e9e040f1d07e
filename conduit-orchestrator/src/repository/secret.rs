//! Secret store
//!
//! Boundary to the secret-storage engine. The orchestrator hands it opaque
//! serialized payloads keyed by workspace and credential name; encryption at
//! rest is the store's concern.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::RepositoryResult;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn write(&self, workspace_id: &str, name: &str, payload: Vec<u8>) -> RepositoryResult<()>;

    async fn read(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<Vec<u8>>>;

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool>;
}

// =============================================================================
// Postgres
// =============================================================================

/// Durable store backing Postgres mode; payloads are kept as opaque bytes
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn write(&self, workspace_id: &str, name: &str, payload: Vec<u8>) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credential_secrets (workspace_id, name, payload, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (workspace_id, name)
            DO UPDATE SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(name)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<Vec<u8>>> {
        let payload = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT payload FROM credential_secrets WHERE workspace_id = $1 AND name = $2",
        )
        .bind(workspace_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload)
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM credential_secrets WHERE workspace_id = $1 AND name = $2")
            .bind(workspace_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local store, lost on restart
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn write(&self, workspace_id: &str, name: &str, payload: Vec<u8>) -> RepositoryResult<()> {
        self.secrets
            .write()
            .await
            .insert((workspace_id.to_string(), name.to_string()), payload);
        Ok(())
    }

    async fn read(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<Vec<u8>>> {
        Ok(self
            .secrets
            .read()
            .await
            .get(&(workspace_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool> {
        Ok(self
            .secrets
            .write()
            .await
            .remove(&(workspace_id.to_string(), name.to_string()))
            .is_some())
    }
}
