// src/db/memory.rs
//! In-process stores, used when no `DATABASE_URL` is configured and in tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::policy::RequestTypePolicy;
use crate::db::models::requests::{Decision, Request, RequestType};
use crate::db::store::{ClaimOutcome, PolicyStore, RequestStore, StoreResult};

struct Row {
    seq: u64,
    request: Request,
    claim: Option<(Uuid, DateTime<Utc>)>,
}

impl Row {
    fn claim_is_live(&self, now: DateTime<Utc>) -> bool {
        matches!(self.claim, Some((_, expires_at)) if expires_at >= now)
    }
}

#[derive(Default)]
struct Rows {
    next_seq: u64,
    by_id: HashMap<Uuid, Row>,
}

impl Rows {
    /// Rows matching `filter`, newest first.
    fn sorted<'a>(&'a self, filter: impl Fn(&Row) -> bool) -> Vec<&'a Row> {
        let mut rows: Vec<&Row> = self.by_id.values().filter(|r| filter(r)).collect();
        rows.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        rows
    }
}

fn deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[derive(Default)]
pub struct MemoryRequestStore {
    rows: RwLock<Rows>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn insert(&self, request: &Request, claim: Option<(Uuid, Duration)>) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.by_id.contains_key(&request.id) {
            return Ok(());
        }
        rows.next_seq += 1;
        let seq = rows.next_seq;
        rows.by_id.insert(
            request.id,
            Row {
                seq,
                request: request.clone(),
                claim: claim.map(|(token, lease)| (token, deadline(lease))),
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Request>> {
        Ok(self.rows.read().await.by_id.get(&id).map(|r| r.request.clone()))
    }

    async fn try_claim(&self, id: Uuid, claim: Uuid, lease: Duration) -> StoreResult<ClaimOutcome> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.by_id.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if row.request.status.is_terminal() {
            return Ok(ClaimOutcome::Decided(row.request.clone()));
        }
        let ours = matches!(row.claim, Some((token, _)) if token == claim);
        if row.claim_is_live(Utc::now()) && !ours {
            return Ok(ClaimOutcome::Busy(row.request.clone()));
        }
        row.claim = Some((claim, deadline(lease)));
        Ok(ClaimOutcome::Claimed(row.request.clone()))
    }

    async fn release_claim(&self, id: Uuid, claim: Uuid) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.by_id.get_mut(&id) {
            if matches!(row.claim, Some((token, _)) if token == claim) {
                row.claim = None;
            }
        }
        Ok(())
    }

    async fn commit_decision(
        &self,
        id: Uuid,
        claim: Uuid,
        decision: &Decision,
    ) -> StoreResult<Option<Request>> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.by_id.get_mut(&id) else {
            return Ok(None);
        };
        let held = matches!(row.claim, Some((token, _)) if token == claim);
        if row.request.is_pending() && held {
            row.request.status = decision.status;
            row.request.decided_by = Some(decision.decided_by.clone());
            row.request.approved_document_id = decision.approved_document_id.clone();
            row.request.decided_at = Some(decision.decided_at);
            row.claim = None;
            return Ok(Some(row.request.clone()));
        }
        Ok(None)
    }

    async fn list_pending(&self) -> StoreResult<Vec<Request>> {
        let rows = self.rows.read().await;
        let now = Utc::now();
        Ok(rows
            .sorted(|r| r.request.is_pending() && !r.claim_is_live(now))
            .into_iter()
            .map(|r| r.request.clone())
            .collect())
    }

    async fn list_history(&self, offset: u64, limit: u32) -> StoreResult<(Vec<Request>, u64)> {
        let rows = self.rows.read().await;
        let decided = rows.sorted(|r| r.request.status.is_terminal());
        let total = decided.len() as u64;
        let items = decided
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .map(|r| r.request.clone())
            .collect();
        Ok((items, total))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<BTreeMap<RequestType, RequestTypePolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get(&self, request_type: RequestType) -> StoreResult<Option<RequestTypePolicy>> {
        Ok(self.policies.read().await.get(&request_type).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<RequestTypePolicy>> {
        Ok(self.policies.read().await.values().cloned().collect())
    }

    async fn set_auto_approved(
        &self,
        request_type: RequestType,
        enabled: bool,
    ) -> StoreResult<Option<RequestTypePolicy>> {
        let mut policies = self.policies.write().await;
        Ok(policies.get_mut(&request_type).map(|policy| {
            policy.is_auto_approved = enabled;
            policy.updated_at = Utc::now();
            policy.clone()
        }))
    }

    async fn ensure(&self, policy: &RequestTypePolicy) -> StoreResult<()> {
        self.policies
            .write()
            .await
            .entry(policy.request_type)
            .or_insert_with(|| policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::requests::{ActorRef, CheckpostDeletePayload, RequestPayload, RequestStatus};

    fn request() -> Request {
        Request::new(
            RequestPayload::CheckpostDelete(CheckpostDeletePayload { checkpost_id: "cp-1".into() }),
            ActorRef { id: "1".into(), display_name: "Ravi".into() },
        )
    }

    fn rejection() -> Decision {
        Decision {
            status: RequestStatus::Rejected,
            decided_by: ActorRef { id: "2".into(), display_name: "Mina".into() },
            approved_document_id: None,
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_claim_is_busy_until_released() {
        let store = MemoryRequestStore::new();
        let req = request();
        store.insert(&req, None).await.unwrap();

        let lease = Duration::from_secs(30);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(matches!(store.try_claim(req.id, first, lease).await.unwrap(), ClaimOutcome::Claimed(_)));
        assert!(matches!(store.try_claim(req.id, second, lease).await.unwrap(), ClaimOutcome::Busy(_)));
        // retrying with the same token is fine
        assert!(matches!(store.try_claim(req.id, first, lease).await.unwrap(), ClaimOutcome::Claimed(_)));

        store.release_claim(req.id, first).await.unwrap();
        assert!(matches!(store.try_claim(req.id, second, lease).await.unwrap(), ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn expired_claim_can_be_taken_over() {
        let store = MemoryRequestStore::new();
        let req = request();
        store.insert(&req, Some((Uuid::new_v4(), Duration::ZERO))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let outcome = store.try_claim(req.id, Uuid::new_v4(), Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn commit_requires_the_claim() {
        let store = MemoryRequestStore::new();
        let req = request();
        store.insert(&req, None).await.unwrap();
        let claim = Uuid::new_v4();

        assert_eq!(store.commit_decision(req.id, claim, &rejection()).await.unwrap(), None);

        store.try_claim(req.id, claim, Duration::from_secs(30)).await.unwrap();
        let committed = store.commit_decision(req.id, claim, &rejection()).await.unwrap().unwrap();
        assert_eq!(committed.status, RequestStatus::Rejected);

        // terminal rows never change again
        assert_eq!(store.commit_decision(req.id, claim, &rejection()).await.unwrap(), None);
        assert!(matches!(
            store.try_claim(req.id, Uuid::new_v4(), Duration::from_secs(30)).await.unwrap(),
            ClaimOutcome::Decided(_)
        ));
    }

    #[tokio::test]
    async fn claimed_rows_are_hidden_from_pending() {
        let store = MemoryRequestStore::new();
        let visible = request();
        let claimed = request();
        store.insert(&visible, None).await.unwrap();
        store.insert(&claimed, Some((Uuid::new_v4(), Duration::from_secs(30)))).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, visible.id);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let store = MemoryRequestStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let req = request();
            let claim = Uuid::new_v4();
            store.insert(&req, Some((claim, Duration::from_secs(30)))).await.unwrap();
            store.commit_decision(req.id, claim, &rejection()).await.unwrap();
            ids.push(req.id);
        }
        ids.reverse();

        let (page, total) = store.list_history(2, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), ids[2..4].to_vec());
    }

    #[tokio::test]
    async fn ensure_keeps_existing_policy() {
        let store = MemoryPolicyStore::new();
        store.ensure(&RequestTypePolicy::new(RequestType::CheckpostCreate, false)).await.unwrap();
        store.set_auto_approved(RequestType::CheckpostCreate, true).await.unwrap();
        store.ensure(&RequestTypePolicy::new(RequestType::CheckpostCreate, false)).await.unwrap();

        let policy = store.get(RequestType::CheckpostCreate).await.unwrap().unwrap();
        assert!(policy.is_auto_approved);
        assert!(store.set_auto_approved(RequestType::CheckpostDelete, true).await.unwrap().is_none());
    }
}
