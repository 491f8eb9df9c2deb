// src/db/retry.rs
//! Retry-with-backoff decorators for the store traits. Only transient
//! (`StoreError::Unavailable`) failures are retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::db::models::policy::RequestTypePolicy;
use crate::db::models::requests::{Decision, Request, RequestType};
use crate::db::store::{ClaimOutcome, PolicyStore, RequestStore, StoreResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// base * 2^(attempt - 1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &'static str, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                let wait = policy.backoff(attempt);
                warn!(
                    "Store call '{}' attempt {}/{} failed: {}. Retrying in {:?}...",
                    op,
                    attempt,
                    policy.max_retries + 1,
                    e,
                    wait
                );
                sleep(wait).await;
            }
            result => return result,
        }
    }
}

pub struct RetryingRequestStore {
    inner: Arc<dyn RequestStore>,
    policy: RetryPolicy,
}

impl RetryingRequestStore {
    pub fn new(inner: Arc<dyn RequestStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl RequestStore for RetryingRequestStore {
    async fn insert(&self, request: &Request, claim: Option<(Uuid, Duration)>) -> StoreResult<()> {
        with_retry(&self.policy, "insert", || self.inner.insert(request, claim)).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Request>> {
        with_retry(&self.policy, "get", || self.inner.get(id)).await
    }

    async fn try_claim(&self, id: Uuid, claim: Uuid, lease: Duration) -> StoreResult<ClaimOutcome> {
        with_retry(&self.policy, "try_claim", || self.inner.try_claim(id, claim, lease)).await
    }

    async fn release_claim(&self, id: Uuid, claim: Uuid) -> StoreResult<()> {
        with_retry(&self.policy, "release_claim", || self.inner.release_claim(id, claim)).await
    }

    async fn commit_decision(
        &self,
        id: Uuid,
        claim: Uuid,
        decision: &Decision,
    ) -> StoreResult<Option<Request>> {
        with_retry(&self.policy, "commit_decision", || {
            self.inner.commit_decision(id, claim, decision)
        })
        .await
    }

    async fn list_pending(&self) -> StoreResult<Vec<Request>> {
        with_retry(&self.policy, "list_pending", || self.inner.list_pending()).await
    }

    async fn list_history(&self, offset: u64, limit: u32) -> StoreResult<(Vec<Request>, u64)> {
        with_retry(&self.policy, "list_history", || self.inner.list_history(offset, limit)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        // health checks report the first failure
        self.inner.ping().await
    }
}

pub struct RetryingPolicyStore {
    inner: Arc<dyn PolicyStore>,
    policy: RetryPolicy,
}

impl RetryingPolicyStore {
    pub fn new(inner: Arc<dyn PolicyStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl PolicyStore for RetryingPolicyStore {
    async fn get(&self, request_type: RequestType) -> StoreResult<Option<RequestTypePolicy>> {
        with_retry(&self.policy, "policy_get", || self.inner.get(request_type)).await
    }

    async fn list(&self) -> StoreResult<Vec<RequestTypePolicy>> {
        with_retry(&self.policy, "policy_list", || self.inner.list()).await
    }

    async fn set_auto_approved(
        &self,
        request_type: RequestType,
        enabled: bool,
    ) -> StoreResult<Option<RequestTypePolicy>> {
        with_retry(&self.policy, "policy_set", || {
            self.inner.set_auto_approved(request_type, enabled)
        })
        .await
    }

    async fn ensure(&self, policy: &RequestTypePolicy) -> StoreResult<()> {
        with_retry(&self.policy, "policy_ensure", || self.inner.ensure(policy)).await
    }
}
