//! Credential DTOs

use serde::{Deserialize, Serialize};

use crate::domain::credential::CredentialSecret;

/// Request to store a new workspace credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCredential {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub secret: CredentialSecret,
}
