//! Credential Vault
//!
//! Credential metadata lives in the `CredentialRepository`; secret payloads
//! are serialized once on creation and handed to the `SecretStore`. Callers
//! get `CredentialInfo` back, never the payload. Only the service reads a
//! secret, and only to authenticate against a provider.

use chrono::Utc;
use conduit_core::domain::credential::{
    CredentialInfo, CredentialSecret, GitCredential, RegistryCredential,
};
use conduit_core::dto::credential::CreateCredential;
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};
use crate::repository::{CredentialRepository, RepositoryError, SecretStore};

const MAX_NAME_LEN: usize = 253;

pub struct CredentialVault {
    credentials: Arc<dyn CredentialRepository>,
    secrets: Arc<dyn SecretStore>,
}

impl CredentialVault {
    pub fn new(credentials: Arc<dyn CredentialRepository>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            credentials,
            secrets,
        }
    }

    pub async fn create(
        &self,
        workspace_id: &str,
        req: CreateCredential,
    ) -> ServiceResult<CredentialInfo> {
        let mut violations = validate_name(&req.name);
        violations.extend(validate_secret(&req.secret));
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let info = CredentialInfo {
            workspace_id: workspace_id.to_string(),
            name: req.name,
            kind: req.secret.kind(),
            description: req.description,
            created_at: Utc::now(),
            last_used_at: None,
        };

        if !self.credentials.insert(&info).await? {
            return Err(ServiceError::Conflict(format!(
                "credential '{}' already exists",
                info.name
            )));
        }

        let payload = serde_json::to_vec(&req.secret).map_err(RepositoryError::from)?;
        if let Err(e) = self.secrets.write(workspace_id, &info.name, payload).await {
            // Metadata without a payload would pass existence checks
            if let Err(rollback) = self.credentials.delete(workspace_id, &info.name).await {
                tracing::error!(
                    "Failed to roll back credential {}/{}: {}",
                    workspace_id,
                    info.name,
                    rollback
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            "Credential created: {}/{} ({})",
            workspace_id,
            info.name,
            info.kind
        );
        Ok(info)
    }

    pub async fn list(&self, workspace_id: &str) -> ServiceResult<Vec<CredentialInfo>> {
        Ok(self.credentials.list(workspace_id).await?)
    }

    pub async fn exists(&self, workspace_id: &str, name: &str) -> ServiceResult<bool> {
        Ok(self.credentials.find(workspace_id, name).await?.is_some())
    }

    /// Decrypted payload for provider authentication; records the use
    pub async fn read(&self, workspace_id: &str, name: &str) -> ServiceResult<CredentialSecret> {
        let payload = self
            .secrets
            .read(workspace_id, name)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("credential '{name}'")))?;
        let secret: CredentialSecret =
            serde_json::from_slice(&payload).map_err(RepositoryError::from)?;
        self.touch(workspace_id, name).await;
        Ok(secret)
    }

    /// Best-effort `last_used_at` update
    pub async fn touch(&self, workspace_id: &str, name: &str) {
        if let Err(e) = self.credentials.touch(workspace_id, name, Utc::now()).await {
            tracing::warn!(
                "Failed to record use of credential {}/{}: {}",
                workspace_id,
                name,
                e
            );
        }
    }

    /// Removes metadata and payload. Reference checks are the caller's job.
    pub async fn delete(&self, workspace_id: &str, name: &str) -> ServiceResult<()> {
        if !self.credentials.delete(workspace_id, name).await? {
            return Err(ServiceError::not_found(format!("credential '{name}'")));
        }
        self.secrets.delete(workspace_id, name).await?;
        tracing::info!("Credential deleted: {}/{}", workspace_id, name);
        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if name.is_empty() {
        violations.push("Credential name cannot be empty".to_string());
        return violations;
    }
    if name.len() > MAX_NAME_LEN {
        violations.push(format!(
            "Credential name is too long (max {MAX_NAME_LEN} characters)"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        violations.push(format!(
            "Credential name '{name}' may only contain lowercase letters, digits and '-'"
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        violations.push(format!(
            "Credential name '{name}' must start and end with a letter or digit"
        ));
    }
    violations
}

fn validate_secret(secret: &CredentialSecret) -> Vec<String> {
    let mut violations = Vec::new();
    match secret {
        CredentialSecret::Git(GitCredential::SshKey { private_key, .. }) => {
            if !private_key.contains("PRIVATE KEY") {
                violations.push("SSH private key is not in PEM/OpenSSH format".to_string());
            }
        }
        CredentialSecret::Git(GitCredential::Token { username, token }) => {
            if username.trim().is_empty() {
                violations.push("Git username cannot be empty".to_string());
            }
            if token.trim().is_empty() {
                violations.push("Git token cannot be empty".to_string());
            }
        }
        CredentialSecret::Registry(RegistryCredential {
            registry,
            username,
            password,
            email,
        }) => {
            if registry.trim().is_empty() {
                violations.push("Registry address cannot be empty".to_string());
            }
            if username.trim().is_empty() {
                violations.push("Registry username cannot be empty".to_string());
            }
            if password.is_empty() {
                violations.push("Registry password cannot be empty".to_string());
            }
            if email.as_deref().is_some_and(|e| !e.contains('@')) {
                violations.push("Registry email is not a valid address".to_string());
            }
        }
    }
    violations
}
