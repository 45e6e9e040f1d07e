//! Credential Repository
//!
//! Credential metadata only. The secret payload lives in the `SecretStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::credential::{CredentialInfo, CredentialKind};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{RepositoryError, RepositoryResult};

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Inserts the metadata; returns false if the name is already taken
    async fn insert(&self, info: &CredentialInfo) -> RepositoryResult<bool>;

    async fn find(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<CredentialInfo>>;

    /// Credentials of a workspace ordered by name
    async fn list(&self, workspace_id: &str) -> RepositoryResult<Vec<CredentialInfo>>;

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool>;

    async fn touch(&self, workspace_id: &str, name: &str, at: DateTime<Utc>) -> RepositoryResult<()>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn insert(&self, info: &CredentialInfo) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO credentials (workspace_id, name, kind, description, created_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (workspace_id, name) DO NOTHING
            "#,
        )
        .bind(&info.workspace_id)
        .bind(&info.name)
        .bind(info.kind.as_str())
        .bind(&info.description)
        .bind(info.created_at)
        .bind(info.last_used_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<CredentialInfo>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT workspace_id, name, kind, description, created_at, last_used_at
            FROM credentials
            WHERE workspace_id = $1 AND name = $2
            "#,
        )
        .bind(workspace_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CredentialInfo::try_from).transpose()
    }

    async fn list(&self, workspace_id: &str) -> RepositoryResult<Vec<CredentialInfo>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT workspace_id, name, kind, description, created_at, last_used_at
            FROM credentials
            WHERE workspace_id = $1
            ORDER BY name ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CredentialInfo::try_from).collect()
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE workspace_id = $1 AND name = $2")
            .bind(workspace_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, workspace_id: &str, name: &str, at: DateTime<Utc>) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE credentials SET last_used_at = $1 WHERE workspace_id = $2 AND name = $3",
        )
        .bind(at)
        .bind(workspace_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    workspace_id: String,
    name: String,
    kind: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for CredentialInfo {
    type Error = RepositoryError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "git" => CredentialKind::Git,
            "registry" => CredentialKind::Registry,
            other => {
                return Err(RepositoryError::Corrupt(format!(
                    "unknown credential kind: {other}"
                )));
            }
        };

        Ok(CredentialInfo {
            workspace_id: row.workspace_id,
            name: row.name,
            kind,
            description: row.description,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: RwLock<BTreeMap<(String, String), CredentialInfo>>,
}

fn key(workspace_id: &str, name: &str) -> (String, String) {
    (workspace_id.to_string(), name.to_string())
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn insert(&self, info: &CredentialInfo) -> RepositoryResult<bool> {
        let mut credentials = self.credentials.write().await;
        let key = key(&info.workspace_id, &info.name);
        if credentials.contains_key(&key) {
            return Ok(false);
        }
        credentials.insert(key, info.clone());
        Ok(true)
    }

    async fn find(&self, workspace_id: &str, name: &str) -> RepositoryResult<Option<CredentialInfo>> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&key(workspace_id, name))
            .cloned())
    }

    async fn list(&self, workspace_id: &str) -> RepositoryResult<Vec<CredentialInfo>> {
        Ok(self
            .credentials
            .read()
            .await
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> RepositoryResult<bool> {
        Ok(self
            .credentials
            .write()
            .await
            .remove(&key(workspace_id, name))
            .is_some())
    }

    async fn touch(&self, workspace_id: &str, name: &str, at: DateTime<Utc>) -> RepositoryResult<()> {
        if let Some(info) = self
            .credentials
            .write()
            .await
            .get_mut(&key(workspace_id, name))
        {
            info.last_used_at = Some(at);
        }
        Ok(())
    }
}
