//! Provider registry
//!
//! Maps provider names to the factories able to connect them.

use conduit_core::domain::provider::{ProviderConfig, ProviderInfo};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ProviderAdapter, ProviderError};

/// Everything a factory needs to build a live adapter for one workspace
#[derive(Debug, Clone)]
pub struct ProviderConnection {
    pub config: ProviderConfig,
    /// API token resolved from the workspace credential named in the config
    pub token: Option<String>,
    /// Upper bound on every individual backend call
    pub request_timeout: Duration,
}

/// Builds adapters for one backend kind
pub trait ProviderFactory: Send + Sync {
    fn info(&self) -> ProviderInfo;

    fn connect(
        &self,
        connection: ProviderConnection,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;
}

/// Registered provider factories, keyed by provider name
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under the name reported by its `info()`
    pub fn with_factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.insert(factory.info().name, factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderFactory>> {
        self.factories.get(name).cloned()
    }

    /// Metadata of every registered provider, ordered by name
    pub fn list(&self) -> Vec<ProviderInfo> {
        self.factories.values().map(|f| f.info()).collect()
    }
}
