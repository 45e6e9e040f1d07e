use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Pipeline runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            workspace_id VARCHAR(255) NOT NULL,
            project_id VARCHAR(255) NOT NULL,
            provider VARCHAR(100) NOT NULL,
            status VARCHAR(50) NOT NULL,
            stages JSONB NOT NULL DEFAULT '[]',
            retry_of UUID REFERENCES pipeline_runs(id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            config_snapshot JSONB NOT NULL,
            external_handle TEXT NOT NULL,
            status_message TEXT,
            requeue_count INTEGER NOT NULL DEFAULT 0,
            CHECK (retry_of IS NULL OR retry_of <> id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_workspace ON pipeline_runs(workspace_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status)")
        .execute(pool)
        .await?;

    // Historical log lines, ordered by id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_logs (
            id BIGSERIAL PRIMARY KEY,
            run_id UUID NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            timestamp TIMESTAMPTZ NOT NULL,
            stage VARCHAR(255) NOT NULL,
            task VARCHAR(255) NOT NULL,
            level VARCHAR(20) NOT NULL,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_logs_run_id ON pipeline_logs(run_id, id)")
        .execute(pool)
        .await?;

    // Credential metadata (secrets live in the secret store)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            workspace_id VARCHAR(255) NOT NULL,
            name VARCHAR(253) NOT NULL,
            kind VARCHAR(20) NOT NULL,
            description TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            last_used_at TIMESTAMPTZ,
            PRIMARY KEY (workspace_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Serialized credential material, opaque to the orchestrator
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credential_secrets (
            workspace_id VARCHAR(255) NOT NULL,
            name VARCHAR(253) NOT NULL,
            payload BYTEA NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (workspace_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_configs (
            workspace_id VARCHAR(255) PRIMARY KEY,
            provider VARCHAR(100) NOT NULL,
            config JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_templates (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            provider VARCHAR(100) NOT NULL,
            parameters JSONB NOT NULL DEFAULT '[]',
            body JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_templates_provider ON pipeline_templates(provider)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
