//! Orchestrator configuration
//!
//! Defines all configurable parameters for the orchestrator: the listen
//! address, storage selection, provider call policy, log streaming limits
//! and status polling.

use std::time::Duration;

use crate::provider::RetryPolicy;
use crate::service::{LogStreamConfig, ServiceSettings};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Postgres connection string; in-memory storage when absent
    pub database_url: Option<String>,

    /// How often non-terminal runs are synced with their backend
    pub poll_interval: Duration,

    /// Upper bound on every individual provider call
    pub provider_timeout: Duration,

    /// Attempts per provider call, including the first
    pub provider_max_attempts: u32,

    /// Base delay of the exponential backoff between attempts
    pub provider_backoff: Duration,

    /// Log entries kept in memory per streamed run
    pub log_buffer_capacity: usize,

    /// Buffered log entries written to history at once
    pub log_flush_batch: usize,

    /// A log stream without upstream progress for this long is ended
    pub log_inactivity_timeout: Duration,

    /// Runs synced concurrently by the status poller
    pub max_parallel_syncs: usize,

    /// Resubmissions after transient failures before a run is failed
    pub max_requeues: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            poll_interval: Duration::from_secs(5),
            provider_timeout: Duration::from_secs(30),
            provider_max_attempts: 3,
            provider_backoff: Duration::from_millis(200),
            log_buffer_capacity: 1000,
            log_flush_batch: 100,
            log_inactivity_timeout: Duration::from_secs(300),
            max_parallel_syncs: 8,
            max_requeues: 3,
        }
    }
}

impl OrchestratorConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ORCHESTRATOR_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (unset: in-memory storage)
    /// - POLL_INTERVAL (seconds, default: 5)
    /// - PROVIDER_TIMEOUT (seconds, default: 30)
    /// - PROVIDER_MAX_ATTEMPTS (default: 3)
    /// - PROVIDER_BACKOFF_MS (default: 200)
    /// - LOG_BUFFER_CAPACITY (default: 1000)
    /// - LOG_FLUSH_BATCH (default: 100)
    /// - LOG_INACTIVITY_TIMEOUT (seconds, default: 300)
    /// - MAX_PARALLEL_SYNCS (default: 8)
    /// - MAX_REQUEUES (default: 3)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let parse = |key: &str| -> anyhow::Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{raw}'")),
                None => Ok(None),
            }
        };
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse(key)?.map(Duration::from_secs).unwrap_or(default))
        };
        let count = |key: &str, default: usize| -> anyhow::Result<usize> {
            Ok(parse(key)?.map(|n| n as usize).unwrap_or(default))
        };

        Ok(Self {
            bind_addr: lookup("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            poll_interval: secs("POLL_INTERVAL", defaults.poll_interval)?,
            provider_timeout: secs("PROVIDER_TIMEOUT", defaults.provider_timeout)?,
            provider_max_attempts: count(
                "PROVIDER_MAX_ATTEMPTS",
                defaults.provider_max_attempts as usize,
            )? as u32,
            provider_backoff: parse("PROVIDER_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.provider_backoff),
            log_buffer_capacity: count("LOG_BUFFER_CAPACITY", defaults.log_buffer_capacity)?,
            log_flush_batch: count("LOG_FLUSH_BATCH", defaults.log_flush_batch)?,
            log_inactivity_timeout: secs("LOG_INACTIVITY_TIMEOUT", defaults.log_inactivity_timeout)?,
            max_parallel_syncs: count("MAX_PARALLEL_SYNCS", defaults.max_parallel_syncs)?,
            max_requeues: count("MAX_REQUEUES", defaults.max_requeues as usize)? as u32,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("database_url must start with postgres:// or postgresql://");
            }
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.provider_timeout.as_secs() == 0 {
            anyhow::bail!("provider_timeout must be greater than 0");
        }

        if self.provider_max_attempts == 0 {
            anyhow::bail!("provider_max_attempts must be greater than 0");
        }

        if self.log_buffer_capacity == 0 {
            anyhow::bail!("log_buffer_capacity must be greater than 0");
        }

        if self.log_flush_batch == 0 || self.log_flush_batch > self.log_buffer_capacity {
            anyhow::bail!("log_flush_batch must be between 1 and log_buffer_capacity");
        }

        if self.log_inactivity_timeout.as_secs() == 0 {
            anyhow::bail!("log_inactivity_timeout must be greater than 0");
        }

        if self.max_parallel_syncs == 0 {
            anyhow::bail!("max_parallel_syncs must be greater than 0");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.provider_max_attempts,
            base_delay: self.provider_backoff,
            ..RetryPolicy::default()
        }
    }

    pub fn log_stream_config(&self) -> LogStreamConfig {
        LogStreamConfig {
            buffer_capacity: self.log_buffer_capacity,
            flush_batch: self.log_flush_batch,
            inactivity_timeout: self.log_inactivity_timeout,
            ..LogStreamConfig::default()
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            retry: self.retry_policy(),
            provider_timeout: self.provider_timeout,
            max_requeues: self.max_requeues,
            ..ServiceSettings::default()
        }
    }
}
