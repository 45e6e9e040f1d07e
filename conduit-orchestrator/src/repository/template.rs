//! Template Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::template::PipelineTemplate;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepositoryError, RepositoryResult};

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn insert(&self, template: &PipelineTemplate) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineTemplate>>;

    /// Templates ordered by name, optionally only those targeting `provider`
    async fn list(&self, provider: Option<&str>) -> RepositoryResult<Vec<PipelineTemplate>>;

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn insert(&self, template: &PipelineTemplate) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_templates (id, name, description, provider, parameters, body,
                                            created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.provider)
        .bind(serde_json::to_value(&template.parameters)?)
        .bind(serde_json::to_value(&template.body)?)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, description, provider, parameters, body, created_at, updated_at
            FROM pipeline_templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineTemplate::try_from).transpose()
    }

    async fn list(&self, provider: Option<&str>) -> RepositoryResult<Vec<PipelineTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, description, provider, parameters, body, created_at, updated_at
            FROM pipeline_templates
            WHERE ($1::TEXT IS NULL OR provider = $1)
            ORDER BY name ASC
            "#,
        )
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineTemplate::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM pipeline_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    provider: String,
    parameters: serde_json::Value,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for PipelineTemplate {
    type Error = RepositoryError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(PipelineTemplate {
            id: row.id,
            name: row.name,
            description: row.description,
            provider: row.provider,
            parameters: serde_json::from_value(row.parameters)?,
            body: serde_json::from_value(row.body)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<Uuid, PipelineTemplate>>,
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn insert(&self, template: &PipelineTemplate) -> RepositoryResult<()> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineTemplate>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn list(&self, provider: Option<&str>) -> RepositoryResult<Vec<PipelineTemplate>> {
        let templates = self.templates.read().await;
        let mut matching: Vec<PipelineTemplate> = templates
            .values()
            .filter(|t| provider.is_none_or(|p| t.provider == p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matching)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        Ok(self.templates.write().await.remove(&id).is_some())
    }
}
