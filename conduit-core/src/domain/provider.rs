//! Provider domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-workspace selection of the active provider and its connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registered provider name (e.g. "gitlab")
    pub provider: String,
    /// Base URL of the backend API
    pub endpoint: String,
    /// Backend-side scope: a project path, a Kubernetes namespace, etc.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Workspace credential holding the API token
    #[serde(default)]
    pub token_credential: Option<String>,
    #[serde(default)]
    pub default_limits: ResourceLimits,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// e.g. "500m"
    pub cpu: Option<String>,
    /// e.g. "512Mi"
    pub memory: Option<String>,
}

/// What a provider offers, as shown to callers choosing a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub features: Vec<String>,
    pub status: ProviderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    Beta,
    Deprecated,
}
