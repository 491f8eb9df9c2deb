use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::requests::{
    ActorRef, CheckpostCreatePayload, CheckpostDeletePayload, HistoryPage, NewRequest, Request,
    RequestPayload, RequestStatus, RequestType,
};
use crate::middleware::auth::Actor;
use crate::utils::api_response::ApiResponse;
use crate::workflow::error::WorkflowError;

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(submit_request))
        .route("/requests/pending", get(get_pending_requests))
        .route("/requests/history", get(get_request_history))
        .route("/requests/{request_id}", get(get_request_by_id))
        .route("/requests/{request_id}/approve", put(approve_request))
        .route("/requests/{request_id}/reject", put(reject_request))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// 1-based page number
    pub page: Option<u32>,
    /// Page size, at most 100
    pub limit: Option<u32>,
}

#[utoipa::path(
    post,
    path = "/requests",
    request_body = NewRequest,
    responses(
        (status = 201, description = "Request queued, or approved by policy", body = Request),
        (status = 400, description = "Unknown request type"),
        (status = 422, description = "Payload does not match the request type"),
        (status = 502, description = "Auto-approval mutation failed; request left pending")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn submit_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewRequest>,
) -> Result<ApiResponse<Request>, WorkflowError> {
    let request = state
        .engine
        .submit(&body.request_type, body.payload, actor.to_ref())
        .await?;

    let message = if request.is_pending() {
        "Request queued for review"
    } else {
        "Request approved by policy"
    };
    Ok(ApiResponse::success(StatusCode::CREATED, message, request))
}

#[utoipa::path(
    get,
    path = "/requests/pending",
    responses(
        (status = 200, description = "Pending requests, newest first", body = Vec<Request>),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn get_pending_requests(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<Request>>, WorkflowError> {
    let requests = state.engine.list_pending().await?;
    Ok(ApiResponse::ok("Pending requests", requests))
}

#[utoipa::path(
    get,
    path = "/requests/history",
    params(HistoryParams),
    responses(
        (status = 200, description = "Decided requests, newest first", body = HistoryPage),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn get_request_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<ApiResponse<HistoryPage>, WorkflowError> {
    let page = state
        .engine
        .list_history(params.page.unwrap_or(1), params.limit.unwrap_or(20))
        .await?;
    Ok(ApiResponse::ok("Request history", page))
}

#[utoipa::path(
    get,
    path = "/requests/{request_id}",
    params(("request_id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request retrieved", body = Request),
        (status = 404, description = "Request not found")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn get_request_by_id(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<ApiResponse<Request>, WorkflowError> {
    let request = state.engine.get(request_id).await?;
    Ok(ApiResponse::ok("Request retrieved", request))
}

#[utoipa::path(
    put,
    path = "/requests/{request_id}/approve",
    params(("request_id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request approved and applied", body = Request),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request was already processed"),
        (status = 502, description = "Mutation failed; request left pending")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn approve_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<ApiResponse<Request>, WorkflowError> {
    actor.require_admin()?;
    let request = state.engine.approve(request_id, actor.to_ref()).await?;
    Ok(ApiResponse::ok("Request approved", request))
}

#[utoipa::path(
    put,
    path = "/requests/{request_id}/reject",
    params(("request_id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request rejected", body = Request),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request was already processed")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn reject_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<ApiResponse<Request>, WorkflowError> {
    actor.require_admin()?;
    let request = state.engine.reject(request_id, actor.to_ref()).await?;
    Ok(ApiResponse::ok("Request rejected", request))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_request,
        get_pending_requests,
        get_request_history,
        get_request_by_id,
        approve_request,
        reject_request
    ),
    components(schemas(
        Request,
        NewRequest,
        HistoryPage,
        RequestStatus,
        RequestType,
        RequestPayload,
        CheckpostCreatePayload,
        CheckpostDeletePayload,
        ActorRef
    )),
    tags(
        (name = "Requests", description = "Submitting and reviewing change requests")
    )
)]
pub struct RequestDoc;
