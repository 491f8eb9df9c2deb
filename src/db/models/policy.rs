// src/db/models/policy.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::requests::RequestType;

/// Auto-approval setting for one request type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestTypePolicy {
    pub request_type: RequestType,
    pub target_collection: String,
    pub is_auto_approved: bool,
    pub updated_at: DateTime<Utc>,
}

impl RequestTypePolicy {
    pub fn new(request_type: RequestType, is_auto_approved: bool) -> Self {
        Self {
            request_type,
            target_collection: request_type.default_target_collection().to_string(),
            is_auto_approved,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    pub is_auto_approved: bool,
}
