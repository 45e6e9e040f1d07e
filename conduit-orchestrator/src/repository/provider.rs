//! Provider Config Repository
//!
//! One active `ProviderConfig` per workspace.

use async_trait::async_trait;
use conduit_core::domain::provider::ProviderConfig;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::RepositoryResult;

#[async_trait]
pub trait ProviderConfigRepository: Send + Sync {
    async fn get(&self, workspace_id: &str) -> RepositoryResult<Option<ProviderConfig>>;

    /// Replaces the workspace's config
    async fn set(&self, workspace_id: &str, config: &ProviderConfig) -> RepositoryResult<()>;
}

pub struct PgProviderConfigRepository {
    pool: PgPool,
}

impl PgProviderConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderConfigRepository for PgProviderConfigRepository {
    async fn get(&self, workspace_id: &str) -> RepositoryResult<Option<ProviderConfig>> {
        let config: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT config FROM provider_configs WHERE workspace_id = $1")
                .bind(workspace_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(config.map(serde_json::from_value).transpose()?)
    }

    async fn set(&self, workspace_id: &str, config: &ProviderConfig) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_configs (workspace_id, provider, config, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workspace_id)
            DO UPDATE SET provider = EXCLUDED.provider,
                          config = EXCLUDED.config,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(&config.provider)
        .bind(serde_json::to_value(config)?)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProviderConfigRepository {
    configs: RwLock<HashMap<String, ProviderConfig>>,
}

#[async_trait]
impl ProviderConfigRepository for InMemoryProviderConfigRepository {
    async fn get(&self, workspace_id: &str) -> RepositoryResult<Option<ProviderConfig>> {
        Ok(self.configs.read().await.get(workspace_id).cloned())
    }

    async fn set(&self, workspace_id: &str, config: &ProviderConfig) -> RepositoryResult<()> {
        self.configs
            .write()
            .await
            .insert(workspace_id.to_string(), config.clone());
        Ok(())
    }
}
