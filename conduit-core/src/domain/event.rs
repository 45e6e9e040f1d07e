//! Pipeline lifecycle events
//!
//! Published to the monitoring collaborator, fire-and-forget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::RunStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub run_id: Uuid,
    pub workspace_id: String,
    pub kind: LifecycleEventKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Created { retry_of: Option<Uuid> },
    Transitioned { from: RunStatus, to: RunStatus },
    /// Resubmitted to the backend after a transient failure
    Requeued { handle: String, attempt: u32 },
    Completed { status: RunStatus },
}
