//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain. Workspace-scoped
//! endpoints take the caller from trusted headers (see `caller`).

pub mod caller;
pub mod credential;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod provider;
pub mod template;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::PipelineService;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<PipelineService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline run endpoints
        .route(
            "/pipelines",
            post(pipeline::create_pipeline).get(pipeline::list_pipelines),
        )
        .route(
            "/pipelines/{id}",
            get(pipeline::get_pipeline).delete(pipeline::delete_pipeline),
        )
        .route("/pipelines/{id}/cancel", post(pipeline::cancel_pipeline))
        .route("/pipelines/{id}/retry", post(pipeline::retry_pipeline))
        .route("/pipelines/{id}/sync", post(pipeline::sync_pipeline))
        .route("/pipelines/{id}/logs", get(pipeline::get_pipeline_logs))
        .route(
            "/pipelines/{id}/logs/stream",
            get(pipeline::stream_pipeline_logs),
        )
        // Template endpoints
        .route(
            "/templates",
            get(template::list_templates).post(template::create_template),
        )
        .route(
            "/templates/{id}",
            get(template::get_template).delete(template::delete_template),
        )
        .route(
            "/templates/{id}/instantiate",
            post(template::instantiate_template),
        )
        // Credential endpoints
        .route(
            "/credentials",
            get(credential::list_credentials).post(credential::create_credential),
        )
        .route("/credentials/{name}", delete(credential::delete_credential))
        // Provider endpoints
        .route("/providers", get(provider::list_providers))
        .route(
            "/providers/config",
            get(provider::get_provider_config).put(provider::set_provider_config),
        )
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::provider::fake::{FakeProvider, FakeProviderFactory};
    use crate::repository::Repositories;
    use crate::service::{ChannelEventSink, LogStreamConfig, ServiceSettings};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use conduit_core::domain::run::RunStatus;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const WS: &str = "ws-1";

    fn app() -> (Router, Arc<FakeProvider>) {
        let provider = FakeProvider::new();
        let registry =
            ProviderRegistry::new().with_factory(FakeProviderFactory::new(provider.clone()));
        let (sink, _events) = ChannelEventSink::new(64);
        let service = PipelineService::new(
            Repositories::in_memory(),
            registry,
            Arc::new(sink),
            ServiceSettings::default(),
            LogStreamConfig::default(),
        );
        (create_router(service), provider)
    }

    fn request(method: &str, uri: &str, workspace: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(workspace) = workspace {
            builder = builder.header(caller::WORKSPACE_HEADER, workspace);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn pipeline_body() -> Value {
        json!({
            "name": "build",
            "project_id": "proj-1",
            "source": { "repository": "https://git.example.com/app.git", "revision": "main" },
            "stages": [
                { "name": "build", "tasks": [{ "name": "compile", "commands": ["make"] }] }
            ]
        })
    }

    async fn configure_provider(app: &Router) {
        let response = send(
            app,
            request(
                "PUT",
                "/providers/config",
                Some(WS),
                Some(json!({ "provider": "fake", "endpoint": "http://ci.local" })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_workspace_header_is_required() {
        let (app, _) = app();
        let response = send(&app, request("GET", "/pipelines", None, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_get_and_cancel_run() {
        let (app, provider) = app();
        configure_provider(&app).await;

        let response = send(&app, request("POST", "/pipelines", Some(WS), Some(pipeline_body()))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let run = json_body(response).await;
        assert_eq!(run["status"], "pending");
        let id = run["id"].as_str().unwrap().to_string();

        let response = send(&app, request("GET", &format!("/pipelines/{id}"), Some("ws-2"), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, request("POST", &format!("/pipelines/{id}/cancel"), Some(WS), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "canceled");
        assert_eq!(provider.cancellations(), 1);

        let response = send(&app, request("DELETE", &format!("/pipelines/{id}"), Some(WS), None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_validation_errors_list_violations() {
        let (app, provider) = app();
        configure_provider(&app).await;

        let mut body = pipeline_body();
        body["name"] = json!("");
        body["stages"] = json!([]);
        let response = send(&app, request("POST", "/pipelines", Some(WS), Some(body))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["violations"].as_array().unwrap().len(), 2);
        assert_eq!(provider.submissions(), 0);
    }

    #[tokio::test]
    async fn test_finished_run_cannot_be_canceled() {
        let (app, provider) = app();
        configure_provider(&app).await;

        let response = send(&app, request("POST", "/pipelines", Some(WS), Some(pipeline_body()))).await;
        let run = json_body(response).await;
        let id = run["id"].as_str().unwrap().to_string();
        let handle = run["external_handle"].as_str().unwrap();
        provider.set_status(handle, RunStatus::Succeeded);

        let response = send(&app, request("POST", &format!("/pipelines/{id}/sync"), Some(WS), None)).await;
        assert_eq!(json_body(response).await["status"], "succeeded");

        let response = send(&app, request("POST", &format!("/pipelines/{id}/cancel"), Some(WS), None)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_credentials_never_echo_secrets() {
        let (app, _) = app();
        let response = send(
            &app,
            request(
                "POST",
                "/credentials",
                Some(WS),
                Some(json!({
                    "name": "gitlab-token",
                    "kind": "git",
                    "secret": { "type": "token", "username": "ci", "token": "glpat-123" }
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&app, request("GET", "/credentials", Some(WS), None)).await;
        let listed = json_body(response).await;
        assert_eq!(listed[0]["name"], "gitlab-token");
        assert!(!listed.to_string().contains("glpat-123"));

        let response = send(&app, request("DELETE", "/credentials/unknown", Some(WS), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_providers() {
        let (app, _) = app();
        let response = send(&app, request("GET", "/providers", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await[0]["name"], "fake");
    }
}
