//! Caller identity
//!
//! The authorization layer in front of the orchestrator resolves who is
//! calling and forwards it in trusted headers. Handlers take a `Caller` to
//! scope every operation to its workspace.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;

pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const IDENTITY_HEADER: &str = "x-identity";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub workspace_id: String,
    pub identity: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let workspace_id = header(WORKSPACE_HEADER).ok_or_else(|| {
            ApiError::BadRequest(format!("missing {WORKSPACE_HEADER} header"))
        })?;

        Ok(Caller {
            workspace_id,
            identity: header(IDENTITY_HEADER),
        })
    }
}
