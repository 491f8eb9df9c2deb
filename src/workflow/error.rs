use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use crate::db::models::requests::Request;
use crate::db::store::StoreError;
use crate::utils::api_response::ApiResponse;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("unknown request type '{0}'")]
    UnknownRequestType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Someone else already decided, or is deciding, this request.
    #[error("request {} was already processed", .current.id)]
    AlreadyDecided { current: Box<Request> },

    #[error("mutation for request {request_id} failed: {reason}")]
    MutationFailed { request_id: Uuid, reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn already_decided(current: Request) -> Self {
        WorkflowError::AlreadyDecided { current: Box::new(current) }
    }

    /// Races that a caller should answer by refreshing, not by alarming the user.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, WorkflowError::AlreadyDecided { .. } | WorkflowError::NotFound(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::UnknownRequestType(_) => StatusCode::BAD_REQUEST,
            WorkflowError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::AlreadyDecided { .. } => StatusCode::CONFLICT,
            WorkflowError::MutationFailed { .. } => StatusCode::BAD_GATEWAY,
            WorkflowError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
            WorkflowError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            WorkflowError::UnknownRequestType(_) => "unknown_request_type",
            WorkflowError::InvalidPayload(_) => "invalid_payload",
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::AlreadyDecided { .. } => "already_decided",
            WorkflowError::MutationFailed { .. } => "mutation_failed",
            WorkflowError::Unauthorized(_) => "unauthorized",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::StoreUnavailable(_) => "store_unavailable",
            WorkflowError::Internal(_) => "internal_error",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => WorkflowError::StoreUnavailable(msg),
            StoreError::Backend(msg) => WorkflowError::Internal(msg),
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let errors = match &self {
            WorkflowError::AlreadyDecided { current } => json!({
                "code": self.code(),
                "current": current,
            }),
            WorkflowError::MutationFailed { request_id, reason } => json!({
                "code": self.code(),
                "requestId": request_id,
                "reason": reason,
            }),
            WorkflowError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                json!({ "code": self.code() })
            }
            _ => json!({ "code": self.code() }),
        };

        let message = match &self {
            WorkflowError::AlreadyDecided { .. } => "Request was already processed".to_string(),
            WorkflowError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        ApiResponse::<()>::error(self.status_code(), message, Some(errors)).into_response()
    }
}
