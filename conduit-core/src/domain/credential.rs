//! Credential domain types
//!
//! Secret payloads are accepted on creation and handed to the secret store.
//! Afterwards only `CredentialInfo` metadata ever leaves the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Git,
    Registry,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Git => "git",
            CredentialKind::Registry => "registry",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Git authentication material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitCredential {
    SshKey {
        private_key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    Token {
        username: String,
        token: String,
    },
}

impl fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitCredential::SshKey { .. } => f.write_str("GitCredential::SshKey(<redacted>)"),
            GitCredential::Token { username, .. } => f
                .debug_struct("GitCredential::Token")
                .field("username", username)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Container registry authentication material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub registry: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Secret payload of either kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "secret", rename_all = "snake_case")]
pub enum CredentialSecret {
    Git(GitCredential),
    Registry(RegistryCredential),
}

impl CredentialSecret {
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialSecret::Git(_) => CredentialKind::Git,
            CredentialSecret::Registry(_) => CredentialKind::Registry,
        }
    }

    /// Token usable for HTTP API authentication, when the payload carries one
    pub fn api_token(&self) -> Option<&str> {
        match self {
            CredentialSecret::Git(GitCredential::Token { token, .. }) => Some(token),
            CredentialSecret::Registry(reg) => Some(&reg.password),
            CredentialSecret::Git(GitCredential::SshKey { .. }) => None,
        }
    }
}

/// Existence metadata for a stored credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInfo {
    pub workspace_id: String,
    pub name: String,
    pub kind: CredentialKind,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
