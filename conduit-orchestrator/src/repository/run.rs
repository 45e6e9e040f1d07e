//! Run Repository
//!
//! Persistence of pipeline runs. Stage detail and the config snapshot are
//! stored as JSONB; status is stored in its snake_case string form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::run::{PipelineRun, RunStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepositoryError, RepositoryResult};

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert(&self, run: &PipelineRun) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineRun>>;

    /// Overwrites the stored run; returns false if it does not exist
    async fn update(&self, run: &PipelineRun) -> RepositoryResult<bool>;

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool>;

    /// Runs of a workspace, newest first, optionally restricted to one project
    async fn list(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<PipelineRun>>;

    /// Every non-terminal run across all workspaces, oldest first
    async fn list_active(&self) -> RepositoryResult<Vec<PipelineRun>>;

    async fn list_active_in_workspace(
        &self,
        workspace_id: &str,
    ) -> RepositoryResult<Vec<PipelineRun>>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn insert(&self, run: &PipelineRun) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, workspace_id, project_id, provider, status, stages,
                                       retry_of, created_at, started_at, finished_at,
                                       config_snapshot, external_handle, status_message,
                                       requeue_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(run.id)
        .bind(&run.workspace_id)
        .bind(&run.project_id)
        .bind(&run.provider)
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run.stages)?)
        .bind(run.retry_of)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(serde_json::to_value(&run.config_snapshot)?)
        .bind(&run.external_handle)
        .bind(&run.status_message)
        .bind(run.requeue_count as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, workspace_id, project_id, provider, status, stages, retry_of,
                   created_at, started_at, finished_at, config_snapshot,
                   external_handle, status_message, requeue_count
            FROM pipeline_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }

    async fn update(&self, run: &PipelineRun) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $1, stages = $2, started_at = $3, finished_at = $4,
                external_handle = $5, status_message = $6, requeue_count = $7
            WHERE id = $8
            "#,
        )
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run.stages)?)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.external_handle)
        .bind(&run.status_message)
        .bind(run.requeue_count as i32)
        .bind(run.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM pipeline_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, workspace_id, project_id, provider, status, stages, retry_of,
                   created_at, started_at, finished_at, config_snapshot,
                   external_handle, status_message, requeue_count
            FROM pipeline_runs
            WHERE workspace_id = $1 AND ($2::TEXT IS NULL OR project_id = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn list_active(&self) -> RepositoryResult<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, workspace_id, project_id, provider, status, stages, retry_of,
                   created_at, started_at, finished_at, config_snapshot,
                   external_handle, status_message, requeue_count
            FROM pipeline_runs
            WHERE status NOT IN ('succeeded', 'failed', 'canceled')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn list_active_in_workspace(
        &self,
        workspace_id: &str,
    ) -> RepositoryResult<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, workspace_id, project_id, provider, status, stages, retry_of,
                   created_at, started_at, finished_at, config_snapshot,
                   external_handle, status_message, requeue_count
            FROM pipeline_runs
            WHERE workspace_id = $1 AND status NOT IN ('succeeded', 'failed', 'canceled')
            ORDER BY created_at ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    workspace_id: String,
    project_id: String,
    provider: String,
    status: String,
    stages: serde_json::Value,
    retry_of: Option<Uuid>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    config_snapshot: serde_json::Value,
    external_handle: String,
    status_message: Option<String>,
    requeue_count: i32,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = RepositoryError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(PipelineRun {
            id: row.id,
            workspace_id: row.workspace_id,
            project_id: row.project_id,
            provider: row.provider,
            status,
            stages: serde_json::from_value(row.stages)?,
            retry_of: row.retry_of,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            config_snapshot: serde_json::from_value(row.config_snapshot)?,
            external_handle: row.external_handle,
            status_message: row.status_message,
            requeue_count: row.requeue_count.max(0) as u32,
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn insert(&self, run: &PipelineRun) -> RepositoryResult<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn update(&self, run: &PipelineRun) -> RepositoryResult<bool> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(stored) => {
                *stored = run.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        Ok(self.runs.write().await.remove(&id).is_some())
    }

    async fn list(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<PipelineRun> = runs
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .filter(|r| project_id.is_none_or(|p| r.project_id == p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_active(&self) -> RepositoryResult<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut active: Vec<PipelineRun> =
            runs.values().filter(|r| !r.is_terminal()).cloned().collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    async fn list_active_in_workspace(
        &self,
        workspace_id: &str,
    ) -> RepositoryResult<Vec<PipelineRun>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|r| r.workspace_id == workspace_id)
            .collect())
    }
}
