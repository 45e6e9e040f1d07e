//! Provider layer
//!
//! A provider adapter translates the provider-agnostic pipeline model into
//! calls against one CI/CD backend and maps the backend's answers back.
//! Adapters are interchangeable implementations of `ProviderAdapter`;
//! orchestration code never branches on which backend it is talking to.
//!
//! Adapters are built by a `ProviderFactory` registered in the
//! `ProviderRegistry`, one factory per backend kind.

#[cfg(test)]
pub mod fake;
pub mod gitlab;
mod registry;
mod retry;

use async_trait::async_trait;
use conduit_core::domain::log::LogEntry;
use conduit_core::domain::run::{PipelineRun, RunStatus, Stage};
use thiserror::Error;
use tokio::sync::mpsc;

// Re-export registry and retry types
pub use registry::{ProviderConnection, ProviderFactory, ProviderRegistry};
pub use retry::RetryPolicy;

/// Failure reported by a provider adapter
///
/// Adapters classify every failure: transient ones (timeouts, throttling,
/// backend unavailability) are retried with backoff, terminal ones surface
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider error: {0}")]
    Terminal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(msg) | ProviderError::Terminal(msg) => msg,
        }
    }
}

/// What the backend currently reports for a submitted run
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Canonical status; adapters only report Queued, Running or a terminal status
    pub status: RunStatus,
    /// Stage/task detail as observed by the backend
    pub stages: Vec<Stage>,
    /// Backend diagnostic, typically set on failure
    pub message: Option<String>,
}

/// Capability contract every CI/CD backend adapter implements
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registered provider name (e.g. "gitlab")
    fn name(&self) -> &str;

    /// Verifies the backend is reachable with the configured credentials
    async fn check_connectivity(&self) -> Result<(), ProviderError>;

    /// Submits the run's config snapshot and returns the backend handle
    async fn submit(&self, run: &PipelineRun) -> Result<String, ProviderError>;

    async fn query_status(&self, handle: &str) -> Result<StatusReport, ProviderError>;

    /// Requests cancellation; `Ok` means the backend acknowledged it
    async fn cancel(&self, handle: &str) -> Result<(), ProviderError>;

    /// Reads the complete log of a run, filtered by stage/task when non-empty
    async fn fetch_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<Vec<LogEntry>, ProviderError>;

    /// Follows a run's log output
    ///
    /// The returned channel yields entries in backend order and closes once the
    /// run has finished and all of its output has been delivered.
    async fn tail_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<mpsc::Receiver<LogEntry>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Transient("503".to_string()).is_transient());
        assert!(!ProviderError::Terminal("404".to_string()).is_transient());
        assert_eq!(ProviderError::Terminal("404".to_string()).message(), "404");
    }
}
