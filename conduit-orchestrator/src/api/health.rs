//! Health Check API Handler
//!
//! Liveness endpoint for monitoring.

use axum::{Json, http::StatusCode, response::IntoResponse};

/// GET /health
/// Liveness check with the running version
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
