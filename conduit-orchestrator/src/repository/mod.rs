//! Repository layer
//!
//! Persistence for runs, log history, credential metadata, provider
//! configuration and templates. Every repository is a trait with a Postgres
//! implementation and an in-memory one used for local development and tests.
//! Secret material never goes through these tables; it is handed to the
//! `SecretStore`.

mod credential;
mod log;
mod provider;
mod run;
mod secret;
mod template;

use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

// Re-export traits
pub use credential::CredentialRepository;
pub use log::LogRepository;
pub use provider::ProviderConfigRepository;
pub use run::RunRepository;
pub use secret::SecretStore;
pub use template::TemplateRepository;

// Re-export implementations
pub use credential::{InMemoryCredentialRepository, PgCredentialRepository};
pub use log::{InMemoryLogRepository, PgLogRepository};
pub use provider::{InMemoryProviderConfigRepository, PgProviderConfigRepository};
pub use run::{InMemoryRunRepository, PgRunRepository};
pub use secret::{InMemorySecretStore, PgSecretStore};
pub use template::{InMemoryTemplateRepository, PgTemplateRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row that no longer maps onto a domain type
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// The full set of repositories the services run against
#[derive(Clone)]
pub struct Repositories {
    pub runs: Arc<dyn RunRepository>,
    pub logs: Arc<dyn LogRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub provider_configs: Arc<dyn ProviderConfigRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Repositories {
    /// Postgres-backed repositories, secrets included
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            runs: Arc::new(PgRunRepository::new(pool.clone())),
            logs: Arc::new(PgLogRepository::new(pool.clone())),
            credentials: Arc::new(PgCredentialRepository::new(pool.clone())),
            provider_configs: Arc::new(PgProviderConfigRepository::new(pool.clone())),
            templates: Arc::new(PgTemplateRepository::new(pool.clone())),
            secrets: Arc::new(PgSecretStore::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(InMemoryRunRepository::default()),
            logs: Arc::new(InMemoryLogRepository::default()),
            credentials: Arc::new(InMemoryCredentialRepository::default()),
            provider_configs: Arc::new(InMemoryProviderConfigRepository::default()),
            templates: Arc::new(InMemoryTemplateRepository::default()),
            secrets: Arc::new(InMemorySecretStore::default()),
        }
    }
}
