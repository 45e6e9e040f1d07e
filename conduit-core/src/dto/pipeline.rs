//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::log::LogEntry;

/// One page of historical log entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    /// Offset to request the next page from, absent on the last page
    pub next_offset: Option<usize>,
}

/// Stage/task filter plus pagination for historical log reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}
