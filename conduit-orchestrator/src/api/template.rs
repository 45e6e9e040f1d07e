//! Template API Handlers
//!
//! HTTP endpoints for the template catalog and template instantiation.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conduit_core::domain::run::PipelineRun;
use conduit_core::domain::template::PipelineTemplate;
use conduit_core::dto::template::{CreateTemplate, InstantiateTemplate};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::caller::Caller;
use crate::api::error::ApiResult;
use crate::service::PipelineService;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub provider: Option<String>,
}

/// GET /templates?provider=
pub async fn list_templates(
    State(service): State<Arc<PipelineService>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<PipelineTemplate>>> {
    tracing::debug!("Listing templates");

    Ok(Json(service.list_templates(params.provider.as_deref()).await?))
}

/// GET /templates/{id}
pub async fn get_template(
    State(service): State<Arc<PipelineService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineTemplate>> {
    tracing::debug!("Getting template: {}", id);

    Ok(Json(service.get_template(id).await?))
}

/// POST /templates
pub async fn create_template(
    State(service): State<Arc<PipelineService>>,
    Json(req): Json<CreateTemplate>,
) -> ApiResult<(StatusCode, Json<PipelineTemplate>)> {
    tracing::info!("Creating template: {}", req.name);

    let template = service.create_template(req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// DELETE /templates/{id}
pub async fn delete_template(
    State(service): State<Arc<PipelineService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting template: {}", id);

    service.delete_template(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /templates/{id}/instantiate
/// Resolve the template with the given parameters and start a run
pub async fn instantiate_template(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<InstantiateTemplate>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!(
        "Instantiating template {} in workspace {}",
        id,
        caller.workspace_id
    );

    let run = service
        .create_pipeline_from_template(&caller.workspace_id, id, &req.params)
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}
