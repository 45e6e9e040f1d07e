//! Provider API Handlers

use axum::{Json, extract::State};
use conduit_core::domain::provider::{ProviderConfig, ProviderInfo};
use std::sync::Arc;

use crate::api::caller::Caller;
use crate::api::error::ApiResult;
use crate::service::PipelineService;

/// GET /providers
pub async fn list_providers(
    State(service): State<Arc<PipelineService>>,
) -> Json<Vec<ProviderInfo>> {
    Json(service.list_providers())
}

/// GET /providers/config
pub async fn get_provider_config(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
) -> ApiResult<Json<ProviderConfig>> {
    Ok(Json(service.get_provider_config(&caller.workspace_id).await?))
}

/// PUT /providers/config
/// Replace the workspace provider once the backend answers
pub async fn set_provider_config(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Json(config): Json<ProviderConfig>,
) -> ApiResult<Json<ProviderConfig>> {
    tracing::info!(
        "Setting provider '{}' for workspace {}",
        config.provider,
        caller.workspace_id
    );

    Ok(Json(
        service
            .set_provider_config(&caller.workspace_id, config)
            .await?,
    ))
}
