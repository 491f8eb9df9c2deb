// src/db/store.rs
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::policy::RequestTypePolicy;
use crate::db::models::requests::{Decision, Request, RequestType};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Transient; worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => {
                // 08xxx connection exceptions, serialization failure, deadlock, admin shutdown
                let transient = db.code().is_some_and(|code| {
                    code.starts_with("08") || code == "40001" || code == "40P01" || code == "57P01"
                });
                if transient {
                    StoreError::Unavailable(err.to_string())
                } else {
                    StoreError::Backend(err.to_string())
                }
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Result of trying to take the decision claim on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Request),
    NotFound,
    /// Already APPROVED or REJECTED.
    Decided(Request),
    /// Still PENDING but another decision holds a live claim.
    Busy(Request),
}

/// Durable record of requests.
///
/// The PENDING→terminal transition is a two-step compare-and-set: a decider
/// first takes a leased claim on an unclaimed PENDING row, then commits the
/// decision guarded by that claim token. Rows with a live claim are left out
/// of `list_pending`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new request, optionally already claimed. Re-inserting the same
    /// id is a no-op so the call is safe to retry.
    async fn insert(&self, request: &Request, claim: Option<(Uuid, Duration)>) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Request>>;

    /// Claim a PENDING request whose claim is free, expired, or already ours.
    async fn try_claim(&self, id: Uuid, claim: Uuid, lease: Duration) -> StoreResult<ClaimOutcome>;

    async fn release_claim(&self, id: Uuid, claim: Uuid) -> StoreResult<()>;

    /// Write the terminal state if the row is still PENDING and held by `claim`.
    /// Returns `None` when the guard did not match.
    async fn commit_decision(
        &self,
        id: Uuid,
        claim: Uuid,
        decision: &Decision,
    ) -> StoreResult<Option<Request>>;

    /// PENDING requests without a live claim, newest first.
    async fn list_pending(&self) -> StoreResult<Vec<Request>>;

    /// Terminal requests, newest first, plus the total number of them.
    async fn list_history(&self, offset: u64, limit: u32) -> StoreResult<(Vec<Request>, u64)>;

    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, request_type: RequestType) -> StoreResult<Option<RequestTypePolicy>>;

    async fn list(&self) -> StoreResult<Vec<RequestTypePolicy>>;

    async fn set_auto_approved(
        &self,
        request_type: RequestType,
        enabled: bool,
    ) -> StoreResult<Option<RequestTypePolicy>>;

    /// Register a policy unless one already exists for its type.
    async fn ensure(&self, policy: &RequestTypePolicy) -> StoreResult<()>;
}
