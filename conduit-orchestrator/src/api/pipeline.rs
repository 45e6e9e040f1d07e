//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline runs: lifecycle operations, historical logs
//! and the live log stream (server-sent events).

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use conduit_core::domain::config::PipelineConfig;
use conduit_core::domain::run::PipelineRun;
use conduit_core::dto::pipeline::{LogPage, LogQuery};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::api::caller::Caller;
use crate::api::error::ApiResult;
use crate::service::{LogEvent, PipelineService};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub project: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub task: String,
}

// =============================================================================
// Run Lifecycle Endpoints
// =============================================================================

/// POST /pipelines
/// Validate, submit and record a new run
pub async fn create_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Json(config): Json<PipelineConfig>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!(
        "Creating pipeline run '{}' in workspace {}",
        config.name,
        caller.workspace_id
    );

    let run = service.create_pipeline(&caller.workspace_id, config).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /pipelines?project=&limit=
/// List the workspace's runs, newest first
pub async fn list_pipelines(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<PipelineRun>>> {
    tracing::debug!("Listing pipeline runs of workspace {}", caller.workspace_id);

    let runs = service
        .list_pipelines(&caller.workspace_id, params.project.as_deref(), params.limit)
        .await?;
    Ok(Json(runs))
}

/// GET /pipelines/{id}
pub async fn get_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting pipeline run: {}", id);

    Ok(Json(service.get_pipeline(&caller.workspace_id, id).await?))
}

/// DELETE /pipelines/{id}
/// Delete a finished run and its log history
pub async fn delete_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline run: {}", id);

    service.delete_pipeline(&caller.workspace_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipelines/{id}/cancel
pub async fn cancel_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!(
        "Canceling pipeline run {} (requested by {})",
        id,
        caller.identity.as_deref().unwrap_or("unknown")
    );

    Ok(Json(service.cancel_pipeline(&caller.workspace_id, id).await?))
}

/// POST /pipelines/{id}/retry
/// Start a new run from a failed or canceled one
pub async fn retry_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!("Retrying pipeline run: {}", id);

    let run = service.retry_pipeline(&caller.workspace_id, id).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// POST /pipelines/{id}/sync
/// Refresh the run from its backend now instead of waiting for the poller
pub async fn sync_pipeline(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Syncing pipeline run: {}", id);

    Ok(Json(service.sync_pipeline_for(&caller.workspace_id, id).await?))
}

// =============================================================================
// Log Endpoints
// =============================================================================

/// GET /pipelines/{id}/logs?stage=&task=&offset=&limit=
pub async fn get_pipeline_logs(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<LogPage>> {
    tracing::debug!("Getting logs for pipeline run: {}", id);

    Ok(Json(
        service
            .get_pipeline_logs(&caller.workspace_id, id, query)
            .await?,
    ))
}

/// GET /pipelines/{id}/logs/stream?stage=&task=
/// Live log entries as `log` events, closed by a single `end` event
pub async fn stream_pipeline_logs(
    State(service): State<Arc<PipelineService>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    tracing::debug!("Streaming logs for pipeline run: {}", id);

    let mut subscription = service
        .stream_pipeline_logs(&caller.workspace_id, id, &params.stage, &params.task)
        .await?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.next().await {
            match event {
                LogEvent::Entry(entry) => match Event::default().event("log").json_data(&entry) {
                    Ok(event) => yield Ok::<_, Infallible>(event),
                    Err(e) => tracing::warn!("Dropping unserializable log entry of run {}: {}", id, e),
                },
                LogEvent::End(reason) => {
                    yield Ok(Event::default().event("end").data(reason.as_str()));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
