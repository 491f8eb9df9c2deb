use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::models::requests::{
    ActorRef, Decision, HistoryPage, Request, RequestEvent, RequestPayload, RequestStatus, RequestType,
};
use crate::db::store::{ClaimOutcome, RequestStore};
use crate::utils::notification::NotificationBus;
use crate::workflow::error::{WorkflowError, WorkflowResult};
use crate::workflow::mutator::{MutationContext, MutatorError, MutatorRegistry};
use crate::workflow::policy::PolicyRegistry;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on a single Resource Mutator call.
    pub mutator_timeout: Duration,
    /// How long a decision claim stays exclusive.
    pub claim_lease: Duration,
}

impl EngineSettings {
    /// A claim must outlive the longest mutator call plus the commit, or a
    /// second decider could take it over mid-mutation.
    pub fn min_claim_lease(&self) -> Duration {
        self.mutator_timeout * 2
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mutator_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Approve,
    Reject,
}

/// Who started a decision; a submission still has to announce the request
/// when the fast path does not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Submission,
    Review,
}

impl Verdict {
    fn status(self) -> RequestStatus {
        match self {
            Verdict::Approve => RequestStatus::Approved,
            Verdict::Reject => RequestStatus::Rejected,
        }
    }
}

/// The request state machine: PENDING → APPROVED | REJECTED.
pub struct WorkflowEngine {
    store: Arc<dyn RequestStore>,
    policies: PolicyRegistry,
    mutators: MutatorRegistry,
    bus: NotificationBus,
    settings: EngineSettings,
    // held across store commit + publish so events leave in commit order
    commit_order: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn RequestStore>,
        policies: PolicyRegistry,
        mutators: MutatorRegistry,
        bus: NotificationBus,
        mut settings: EngineSettings,
    ) -> Self {
        let min_lease = settings.min_claim_lease();
        if settings.claim_lease < min_lease {
            warn!(
                claim_lease = ?settings.claim_lease,
                mutator_timeout = ?settings.mutator_timeout,
                "Claim lease too short for the mutator timeout, raising it to {:?}",
                min_lease
            );
            settings.claim_lease = min_lease;
        }
        Self {
            store,
            policies,
            mutators,
            bus,
            settings,
            commit_order: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Queue a change for review, or apply it right away when its type is
    /// auto-approved.
    #[instrument(skip(self, payload, requested_by), fields(requested_by = %requested_by.id))]
    pub async fn submit(
        &self,
        request_type: &str,
        payload: Value,
        requested_by: ActorRef,
    ) -> WorkflowResult<Request> {
        let request_type: RequestType = request_type
            .parse()
            .map_err(|_| WorkflowError::UnknownRequestType(request_type.to_string()))?;
        let policy = self.policies.get(request_type).await.map_err(|e| match e {
            WorkflowError::NotFound(_) => WorkflowError::UnknownRequestType(request_type.to_string()),
            other => other,
        })?;
        let payload = RequestPayload::parse(request_type, payload).map_err(WorkflowError::InvalidPayload)?;
        let request = Request::new(payload, requested_by.clone());

        if !policy.is_auto_approved {
            let _order = self.commit_order.lock().await;
            self.store.insert(&request, None).await?;
            self.bus.publish(RequestEvent::for_request(request.clone()));
            info!(request_id = %request.id, %request_type, "Request queued for review");
            return Ok(request);
        }

        // Inserted already claimed, so nobody else can decide it and it never
        // shows up as pending while the mutation runs.
        let claim = Uuid::new_v4();
        self.store.insert(&request, Some((claim, self.settings.claim_lease))).await?;
        info!(request_id = %request.id, %request_type, "Request auto-approved by policy");

        self.decide_claimed(request, claim, Verdict::Approve, requested_by, Origin::Submission)
            .await
    }

    #[instrument(skip(self, reviewer), fields(reviewer = %reviewer.id))]
    pub async fn approve(&self, request_id: Uuid, reviewer: ActorRef) -> WorkflowResult<Request> {
        self.decide(request_id, Verdict::Approve, reviewer).await
    }

    #[instrument(skip(self, reviewer), fields(reviewer = %reviewer.id))]
    pub async fn reject(&self, request_id: Uuid, reviewer: ActorRef) -> WorkflowResult<Request> {
        self.decide(request_id, Verdict::Reject, reviewer).await
    }

    pub async fn get(&self, request_id: Uuid) -> WorkflowResult<Request> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("request {}", request_id)))
    }

    pub async fn ping(&self) -> WorkflowResult<()> {
        Ok(self.store.ping().await?)
    }

    /// PENDING requests, newest first.
    pub async fn list_pending(&self) -> WorkflowResult<Vec<Request>> {
        Ok(self.store.list_pending().await?)
    }

    /// Decided requests, newest first. `page` is 1-based.
    pub async fn list_history(&self, page: u32, page_size: u32) -> WorkflowResult<HistoryPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(page_size);
        let (items, total_count) = self.store.list_history(offset, page_size).await?;
        Ok(HistoryPage {
            items,
            page,
            page_size,
            total_count,
        })
    }

    async fn decide(&self, request_id: Uuid, verdict: Verdict, decider: ActorRef) -> WorkflowResult<Request> {
        let claim = Uuid::new_v4();
        let request = match self
            .store
            .try_claim(request_id, claim, self.settings.claim_lease)
            .await?
        {
            ClaimOutcome::Claimed(request) => request,
            ClaimOutcome::NotFound => {
                return Err(WorkflowError::NotFound(format!("request {}", request_id)))
            }
            ClaimOutcome::Decided(current) | ClaimOutcome::Busy(current) => {
                info!(%request_id, status = ?current.status, "Request already processed");
                return Err(WorkflowError::already_decided(current));
            }
        };

        self.decide_claimed(request, claim, verdict, decider, Origin::Review).await
    }

    /// Finish a decision on a request we hold the claim for.
    async fn decide_claimed(
        &self,
        request: Request,
        claim: Uuid,
        verdict: Verdict,
        decider: ActorRef,
        origin: Origin,
    ) -> WorkflowResult<Request> {
        let approved_document_id = match verdict {
            Verdict::Approve => match self.apply_mutation(&request).await {
                Ok(document_id) => Some(document_id),
                Err(reason) => {
                    warn!(request_id = %request.id, %reason, "Resource mutation failed; request stays pending");
                    self.hand_back(&request, claim, origin).await;
                    return Err(WorkflowError::MutationFailed {
                        request_id: request.id,
                        reason,
                    });
                }
            },
            Verdict::Reject => None,
        };

        let decision = Decision {
            status: verdict.status(),
            decided_by: decider,
            approved_document_id,
            decided_at: Utc::now(),
        };

        let order = self.commit_order.lock().await;
        let committed = match self.store.commit_decision(request.id, claim, &decision).await {
            Ok(Some(committed)) => committed,
            Ok(None) => self.reconcile_commit(request.id, &decision).await?,
            Err(e) => {
                error!(request_id = %request.id, "Failed to commit decision: {}", e);
                drop(order);
                if origin == Origin::Submission {
                    self.announce_uncommitted(request.id, claim).await;
                }
                return Err(e.into());
            }
        };

        self.bus.publish(RequestEvent::for_request(committed.clone()));
        info!(request_id = %committed.id, status = ?committed.status, "Request decided");
        Ok(committed)
    }

    /// Give a request back to reviewers after a failed mutation. The release
    /// and, for submissions, the SUBMITTED event happen under the commit-order
    /// lock, so no decision on the released row can be published first.
    async fn hand_back(&self, request: &Request, claim: Uuid, origin: Origin) {
        let _order = self.commit_order.lock().await;
        if let Err(e) = self.store.release_claim(request.id, claim).await {
            warn!(request_id = %request.id, "Could not release claim, waiting for lease expiry: {}", e);
        }
        if origin == Origin::Submission {
            self.bus.publish(RequestEvent::for_request(request.clone()));
        }
    }

    /// The auto-approve commit failed after the mutation went through. The
    /// request goes back to reviewers; the idempotent mutator hands a second
    /// approval the same resource. Dashboards get whatever the store now holds.
    async fn announce_uncommitted(&self, request_id: Uuid, claim: Uuid) {
        let _order = self.commit_order.lock().await;
        if let Err(e) = self.store.release_claim(request_id, claim).await {
            warn!(%request_id, "Could not release claim, waiting for lease expiry: {}", e);
        }
        match self.store.get(request_id).await {
            Ok(Some(current)) => {
                warn!(%request_id, status = ?current.status, "Auto-approval not committed; publishing stored state");
                self.bus.publish(RequestEvent::for_request(current));
            }
            Ok(None) => warn!(%request_id, "Auto-approved request vanished before commit"),
            Err(e) => warn!(
                %request_id,
                "Auto-approval not committed and store unreadable; dashboards see it after resync: {}",
                e
            ),
        }
    }

    /// The guarded commit matched nothing. Either an earlier attempt of ours
    /// already landed, or the claim was lost to someone else.
    async fn reconcile_commit(&self, request_id: Uuid, decision: &Decision) -> WorkflowResult<Request> {
        match self.store.get(request_id).await? {
            Some(current)
                if current.status == decision.status
                    && current.approved_document_id == decision.approved_document_id
                    && current.decided_by.as_ref() == Some(&decision.decided_by) =>
            {
                Ok(current)
            }
            Some(current) => Err(WorkflowError::already_decided(current)),
            None => Err(WorkflowError::NotFound(format!("request {}", request_id))),
        }
    }

    async fn apply_mutation(&self, request: &Request) -> Result<String, String> {
        let policy = self
            .policies
            .get(request.request_type())
            .await
            .map_err(|e| e.to_string())?;
        let mutator = self
            .mutators
            .get(&policy.target_collection)
            .ok_or_else(|| MutatorError::Unsupported(policy.target_collection.clone()).to_string())?;

        let ctx = MutationContext {
            request_id: request.id,
            collection: policy.target_collection,
        };
        match tokio::time::timeout(self.settings.mutator_timeout, mutator.apply(&ctx, &request.payload)).await {
            Ok(Ok(document_id)) => Ok(document_id),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.settings.mutator_timeout)),
        }
    }
}
