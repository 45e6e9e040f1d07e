//! Log domain types

use serde::{Deserialize, Serialize};

/// A log line produced by a pipeline task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stage: String,
    pub task: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Whether this entry passes a stage/task filter, empty meaning "any"
    pub fn matches(&self, stage: &str, task: &str) -> bool {
        (stage.is_empty() || self.stage == stage) && (task.is_empty() || self.task == task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Debug" => LogLevel::Debug,
            "Warning" => LogLevel::Warning,
            "Error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}
