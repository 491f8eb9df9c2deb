// src/db/models/requests.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Kinds of privileged change that go through review.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    CheckpostCreate,
    CheckpostDelete,
}

impl RequestType {
    pub const ALL: [RequestType; 2] = [RequestType::CheckpostCreate, RequestType::CheckpostDelete];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::CheckpostCreate => "CHECKPOST_CREATE",
            RequestType::CheckpostDelete => "CHECKPOST_DELETE",
        }
    }

    /// Collection the approved payload is applied to.
    pub fn default_target_collection(&self) -> &'static str {
        match self {
            RequestType::CheckpostCreate | RequestType::CheckpostDelete => "checkposts",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a request type tag is not one we know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRequestType(pub String);

impl FromStr for RequestType {
    type Err = UnknownRequestType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRequestType(s.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// Fields for a new checkpost account.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckpostCreatePayload {
    pub name: String,
    pub location: String,
    pub contact_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckpostDeletePayload {
    pub checkpost_id: String,
}

/// Payload of a request, keyed by its request type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(tag = "requestType", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestPayload {
    CheckpostCreate(CheckpostCreatePayload),
    CheckpostDelete(CheckpostDeletePayload),
}

impl RequestPayload {
    /// Decode an untyped payload for `request_type` and check its shape.
    pub fn parse(request_type: RequestType, payload: Value) -> Result<Self, String> {
        let parsed = match request_type {
            RequestType::CheckpostCreate => serde_json::from_value(payload)
                .map(RequestPayload::CheckpostCreate),
            RequestType::CheckpostDelete => serde_json::from_value(payload)
                .map(RequestPayload::CheckpostDelete),
        }
        .map_err(|e| e.to_string())?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            RequestPayload::CheckpostCreate(_) => RequestType::CheckpostCreate,
            RequestPayload::CheckpostDelete(_) => RequestType::CheckpostDelete,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            RequestPayload::CheckpostCreate(p) => {
                if p.name.trim().is_empty() {
                    return Err("name must not be empty".into());
                }
                if p.location.trim().is_empty() {
                    return Err("location must not be empty".into());
                }
                let email = p.contact_email.trim();
                match email.split_once('@') {
                    Some((user, domain)) if !user.is_empty() && domain.contains('.') => {}
                    _ => return Err(format!("contactEmail '{}' is not a valid address", email)),
                }
                if let Some(phone) = &p.contact_phone {
                    if !phone.chars().all(|c| c.is_ascii_digit() || "+- ()".contains(c)) {
                        return Err("contactPhone contains invalid characters".into());
                    }
                }
                Ok(())
            }
            RequestPayload::CheckpostDelete(p) => {
                if p.checkpost_id.trim().is_empty() {
                    return Err("checkpostId must not be empty".into());
                }
                Ok(())
            }
        }
    }

    /// The payload body without its type tag, as stored.
    pub fn body(&self) -> Value {
        match self {
            RequestPayload::CheckpostCreate(p) => serde_json::to_value(p),
            RequestPayload::CheckpostDelete(p) => serde_json::to_value(p),
        }
        .unwrap_or(Value::Null)
    }
}

/// Who submitted or decided a request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActorRef {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: RequestPayload,
    pub status: RequestStatus,
    pub requested_by: ActorRef,
    pub decided_by: Option<ActorRef>,
    pub approved_document_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(payload: RequestPayload, requested_by: ActorRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: RequestStatus::Pending,
            requested_by,
            decided_by: None,
            approved_document_id: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.payload.request_type()
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Terminal outcome written by the compare-and-set commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: RequestStatus,
    pub decided_by: ActorRef,
    pub approved_document_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub request_type: String,
    #[schema(value_type = Object)]
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<Request>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestEventKind {
    Submitted,
    Approved,
    Rejected,
}

/// A committed state change, as pushed to dashboards.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub event: RequestEventKind,
    pub request: Request,
    pub published_at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn for_request(request: Request) -> Self {
        let event = match request.status {
            RequestStatus::Pending => RequestEventKind::Submitted,
            RequestStatus::Approved => RequestEventKind::Approved,
            RequestStatus::Rejected => RequestEventKind::Rejected,
        };
        Self {
            event,
            request,
            published_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor() -> ActorRef {
        ActorRef { id: "7".into(), display_name: "Asha".into() }
    }

    #[test]
    fn request_type_parses_case_insensitively() {
        assert_eq!("checkpost_create".parse::<RequestType>(), Ok(RequestType::CheckpostCreate));
        assert_eq!(
            "BUS_CREATE".parse::<RequestType>(),
            Err(UnknownRequestType("BUS_CREATE".into()))
        );
    }

    #[test]
    fn create_payload_requires_valid_email() {
        let err = RequestPayload::parse(
            RequestType::CheckpostCreate,
            json!({ "name": "North Gate", "location": "NH-44", "contactEmail": "nobody" }),
        )
        .unwrap_err();
        assert!(err.contains("contactEmail"));
    }

    #[test]
    fn payload_rejects_fields_of_another_type() {
        let err = RequestPayload::parse(
            RequestType::CheckpostDelete,
            json!({ "name": "North Gate", "location": "NH-44", "contactEmail": "a@b.io" }),
        );
        assert!(err.is_err());
    }

    #[test]
    fn request_serializes_with_flat_type_tag() {
        let payload = RequestPayload::parse(
            RequestType::CheckpostDelete,
            json!({ "checkpostId": "cp-12" }),
        )
        .unwrap();
        let request = Request::new(payload, actor());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["requestType"], "CHECKPOST_DELETE");
        assert_eq!(value["payload"]["checkpostId"], "cp-12");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["requestedBy"]["displayName"], "Asha");
        assert!(value["approvedDocumentId"].is_null());

        let back: Request = serde_json::from_value(value).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn event_kind_follows_status() {
        let payload = RequestPayload::CheckpostDelete(CheckpostDeletePayload { checkpost_id: "1".into() });
        let mut request = Request::new(payload, actor());
        assert_eq!(RequestEvent::for_request(request.clone()).event, RequestEventKind::Submitted);
        request.status = RequestStatus::Rejected;
        assert_eq!(RequestEvent::for_request(request).event, RequestEventKind::Rejected);
    }
}
