use axum::{
    extract::{Extension, Path, State},
    routing::{get, put},
    Json, Router,
};
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::db::models::policy::{RequestTypePolicy, UpdatePolicy};
use crate::db::models::requests::RequestType;
use crate::middleware::auth::Actor;
use crate::utils::api_response::ApiResponse;
use crate::workflow::error::WorkflowError;

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/requests/settings", get(list_settings))
        .route("/requests/settings/{request_type}", put(update_setting))
}

#[utoipa::path(
    get,
    path = "/requests/settings",
    responses(
        (status = 200, description = "Auto-approval policy per request type", body = Vec<RequestTypePolicy>)
    ),
    tag = "Request Settings",
    security(("bearerAuth" = []))
)]
pub async fn list_settings(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<RequestTypePolicy>>, WorkflowError> {
    let policies = state.engine.policies().list_all().await?;
    Ok(ApiResponse::ok("Request settings", policies))
}

#[utoipa::path(
    put,
    path = "/requests/settings/{request_type}",
    params(("request_type" = String, Path, description = "Request type, e.g. CHECKPOST_CREATE")),
    request_body = UpdatePolicy,
    responses(
        (status = 200, description = "Policy updated", body = RequestTypePolicy),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "Unknown request type")
    ),
    tag = "Request Settings",
    security(("bearerAuth" = []))
)]
pub async fn update_setting(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_type): Path<String>,
    Json(body): Json<UpdatePolicy>,
) -> Result<ApiResponse<RequestTypePolicy>, WorkflowError> {
    actor.require_admin()?;
    let request_type: RequestType = request_type
        .parse()
        .map_err(|_| WorkflowError::NotFound(format!("policy for {}", request_type)))?;
    let policy = state
        .engine
        .policies()
        .set_auto_approved(request_type, body.is_auto_approved)
        .await?;
    Ok(ApiResponse::ok("Request setting updated", policy))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_settings, update_setting),
    components(schemas(RequestTypePolicy, UpdatePolicy)),
    tags(
        (name = "Request Settings", description = "Per-type auto-approval toggles")
    )
)]
pub struct SettingsDoc;
