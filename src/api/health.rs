use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::app_state::AppState;

/// Defines health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
}

/// Liveness: the process is up. Does not touch the store.
async fn liveness_check() -> Json<Value> {
    Json(json!({ "success": true, "message": "API is live" }))
}

/// Readiness: the request store answers.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.engine.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "API is ready",
                "sessions": state.engine.bus().connected()
            })),
        ),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "message": "Request store unavailable" })),
            )
        }
    }
}
