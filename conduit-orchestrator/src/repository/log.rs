//! Log Repository
//!
//! Historical log storage. Entries flushed by the log stream multiplexer
//! land here, and are read back in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::log::{LogEntry, LogLevel};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RepositoryResult;

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(&self, run_id: Uuid, entries: &[LogEntry]) -> RepositoryResult<()>;

    /// Stored entries of a run, filtered by stage/task when non-empty
    async fn find(&self, run_id: Uuid, stage: &str, task: &str) -> RepositoryResult<Vec<LogEntry>>;

    /// Number of stored entries of a run
    async fn count(&self, run_id: Uuid) -> RepositoryResult<usize>;

    async fn delete_by_run(&self, run_id: Uuid) -> RepositoryResult<u64>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgLogRepository {
    pool: PgPool,
}

impl PgLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepository for PgLogRepository {
    async fn append(&self, run_id: Uuid, entries: &[LogEntry]) -> RepositoryResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO pipeline_logs (run_id, timestamp, stage, task, level, message)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(run_id)
            .bind(entry.timestamp)
            .bind(&entry.stage)
            .bind(&entry.task)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn find(&self, run_id: Uuid, stage: &str, task: &str) -> RepositoryResult<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT timestamp, stage, task, level, message
            FROM pipeline_logs
            WHERE run_id = $1
              AND ($2 = '' OR stage = $2)
              AND ($3 = '' OR task = $3)
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .bind(stage)
        .bind(task)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(LogEntry::from).collect())
    }

    async fn count(&self, run_id: Uuid) -> RepositoryResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_logs WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }

    async fn delete_by_run(&self, run_id: Uuid) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM pipeline_logs WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: DateTime<Utc>,
    stage: String,
    task: String,
    level: String,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            stage: row.stage,
            task: row.task,
            level: LogLevel::parse(&row.level),
            message: row.message,
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryLogRepository {
    logs: RwLock<HashMap<Uuid, Vec<LogEntry>>>,
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(&self, run_id: Uuid, entries: &[LogEntry]) -> RepositoryResult<()> {
        self.logs
            .write()
            .await
            .entry(run_id)
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn find(&self, run_id: Uuid, stage: &str, task: &str) -> RepositoryResult<Vec<LogEntry>> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(&run_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.matches(stage, task))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, run_id: Uuid) -> RepositoryResult<usize> {
        Ok(self.logs.read().await.get(&run_id).map_or(0, Vec::len))
    }

    async fn delete_by_run(&self, run_id: Uuid) -> RepositoryResult<u64> {
        let removed = self.logs.write().await.remove(&run_id);
        Ok(removed.map(|entries| entries.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stage: &str, task: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            task: task.to_string(),
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_filters() {
        let repo = InMemoryLogRepository::default();
        let run_id = Uuid::new_v4();
        repo.append(run_id, &[entry("build", "compile", "a"), entry("test", "unit", "b")])
            .await
            .unwrap();
        repo.append(run_id, &[entry("build", "compile", "c")])
            .await
            .unwrap();

        let all = repo.find(run_id, "", "").await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(repo.find(run_id, "build", "").await.unwrap().len(), 2);
        assert_eq!(repo.find(run_id, "", "unit").await.unwrap().len(), 1);
        assert_eq!(repo.count(run_id).await.unwrap(), 3);
        assert_eq!(repo.count(Uuid::new_v4()).await.unwrap(), 0);

        assert_eq!(repo.delete_by_run(run_id).await.unwrap(), 3);
        assert!(repo.find(run_id, "", "").await.unwrap().is_empty());
    }
}
