//! Credential API Handlers
//!
//! Workspace credentials. Secret payloads are accepted on creation only;
//! responses carry metadata.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conduit_core::domain::credential::CredentialInfo;
use conduit_core::dto::credential::CreateCredential;
use std::sync::Arc;

use crate::api::caller::Caller;
use crate::api::error::ApiResult;
use crate::service::PipelineService;

/// GET /credentials
pub async fn list_credentials(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
) -> ApiResult<Json<Vec<CredentialInfo>>> {
    tracing::debug!("Listing credentials of workspace {}", caller.workspace_id);

    Ok(Json(service.list_credentials(&caller.workspace_id).await?))
}

/// POST /credentials
pub async fn create_credential(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Json(req): Json<CreateCredential>,
) -> ApiResult<(StatusCode, Json<CredentialInfo>)> {
    tracing::info!(
        "Creating {} credential '{}' in workspace {}",
        req.secret.kind(),
        req.name,
        caller.workspace_id
    );

    let info = service.create_credential(&caller.workspace_id, req).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// DELETE /credentials/{name}
/// Refused while a live run or the provider config references it
pub async fn delete_credential(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Deleting credential '{}' in workspace {}",
        name,
        caller.workspace_id
    );

    service.delete_credential(&caller.workspace_id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
