//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::config::PipelineConfig;

/// A single execution instance of a pipeline configuration
///
/// Owned exclusively by the workspace that created it. `status`,
/// `started_at` and `finished_at` are only ever written by the run
/// state machine in the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub workspace_id: String,
    pub project_id: String,
    pub provider: String,
    pub status: RunStatus,
    pub stages: Vec<Stage>,
    /// Run this one was retried from, if any
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Fully resolved configuration, immutable once the run exists
    pub config_snapshot: PipelineConfig,
    /// Opaque backend identifier returned by the provider on submission
    pub external_handle: String,
    /// Diagnostic recorded when a provider error drives the run to a terminal state
    pub status_message: Option<String>,
    pub requeue_count: u32,
}

impl PipelineRun {
    /// Builds a fresh run in `Pending` with a stage plan derived from the config
    pub fn new(
        workspace_id: impl Into<String>,
        provider: impl Into<String>,
        config: PipelineConfig,
        external_handle: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            project_id: config.project_id.clone(),
            provider: provider.into(),
            status: RunStatus::Pending,
            stages: config.stage_plan(),
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            config_snapshot: config,
            external_handle: external_handle.into(),
            status_message: None,
            requeue_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Retrying => "retrying",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "retrying" => Ok(RunStatus::Retrying),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A named group of tasks, executed in order within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub tasks: Vec<Task>,
}

/// Observed state of a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit: Option<TaskExit>,
}

impl Task {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            exit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Skipped,
}

/// How a task finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExit {
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}
