//! Client-side view of the request queue for one connected dashboard.
//!
//! Push events keep the views current between fetches; a resync against the
//! query interface always wins over whatever the events produced.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::db::models::requests::{HistoryPage, Request, RequestEvent, RequestStatus};
use crate::utils::notification::{Delivery, NotificationBus, Subscription};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::error::WorkflowResult;

/// Read side the session reconciles against.
#[async_trait]
pub trait RequestQuery: Send + Sync {
    async fn list_pending(&self) -> WorkflowResult<Vec<Request>>;
    async fn list_history(&self, page: u32, page_size: u32) -> WorkflowResult<HistoryPage>;
}

#[async_trait]
impl RequestQuery for WorkflowEngine {
    async fn list_pending(&self) -> WorkflowResult<Vec<Request>> {
        WorkflowEngine::list_pending(self).await
    }

    async fn list_history(&self, page: u32, page_size: u32) -> WorkflowResult<HistoryPage> {
        WorkflowEngine::list_history(self, page, page_size).await
    }
}

#[derive(Debug, Clone)]
pub struct DashboardSession {
    id: Uuid,
    pending: Vec<Request>,
    history: Vec<Request>,
    history_page: u32,
    history_page_size: u32,
    history_total: u64,
    // decided ids already reflected in history_total
    decided: HashSet<Uuid>,
}

impl DashboardSession {
    pub fn new(history_page_size: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            pending: Vec::new(),
            history: Vec::new(),
            history_page: 1,
            history_page_size: history_page_size.max(1),
            history_total: 0,
            decided: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pending(&self) -> &[Request] {
        &self.pending
    }

    pub fn history(&self) -> &[Request] {
        &self.history
    }

    pub fn history_total(&self) -> u64 {
        self.history_total
    }

    pub fn history_page(&self) -> u32 {
        self.history_page
    }

    pub fn subscribe(&self, bus: &NotificationBus) -> Subscription {
        bus.subscribe(self.id)
    }

    /// Merge one pushed change into the views. Applying the same event twice
    /// leaves the views as applying it once.
    pub fn apply_event(&mut self, event: &RequestEvent) {
        let request = &event.request;
        match request.status {
            RequestStatus::Pending => {
                if self.decided.contains(&request.id) {
                    // decided already; this is a late redelivery
                    debug!(session_id = %self.id, request_id = %request.id, "Ignoring stale pending event");
                    return;
                }
                upsert_front(&mut self.pending, request);
            }
            RequestStatus::Approved | RequestStatus::Rejected => {
                self.pending.retain(|r| r.id != request.id);
                if let Some(existing) = self.history.iter_mut().find(|r| r.id == request.id) {
                    *existing = request.clone();
                    return;
                }
                if !self.decided.insert(request.id) {
                    debug!(session_id = %self.id, request_id = %request.id, "Ignoring redelivered decision");
                    return;
                }
                self.history_total += 1;
                // later pages shift but keep their rows until the next fetch
                if self.history_page == 1 {
                    insert_by_created(&mut self.history, request);
                    self.history.truncate(self.history_page_size as usize);
                }
            }
        }
    }

    /// Handle one bus delivery, re-fetching when the feed reports a gap.
    pub async fn handle(&mut self, delivery: Delivery, query: &dyn RequestQuery) -> WorkflowResult<()> {
        match delivery {
            Delivery::Event(event) => {
                self.apply_event(&event);
                Ok(())
            }
            Delivery::Resync { .. } => self.resync(query).await,
        }
    }

    pub fn replace_pending(&mut self, pending: Vec<Request>) {
        self.pending = pending;
    }

    pub fn replace_history(&mut self, page: HistoryPage) {
        self.history_page = page.page;
        self.history_page_size = page.page_size;
        self.history_total = page.total_count;
        self.decided = page.items.iter().map(|r| r.id).collect();
        self.history = page.items;
    }

    /// Replace both views with the server's current answer.
    pub async fn resync(&mut self, query: &dyn RequestQuery) -> WorkflowResult<()> {
        let pending = query.list_pending().await?;
        let history = query.list_history(self.history_page, self.history_page_size).await?;
        self.replace_pending(pending);
        self.replace_history(history);
        Ok(())
    }

    /// Switch the history view to another page.
    pub async fn show_history_page(&mut self, page: u32, query: &dyn RequestQuery) -> WorkflowResult<()> {
        let history = query.list_history(page, self.history_page_size).await?;
        self.replace_history(history);
        Ok(())
    }
}

/// Replace the entry with the same id in place, or prepend.
fn upsert_front(view: &mut Vec<Request>, request: &Request) {
    match view.iter_mut().find(|r| r.id == request.id) {
        Some(existing) => *existing = request.clone(),
        None => view.insert(0, request.clone()),
    }
}

/// Keep the view newest-first by creation time, as the history query orders it.
fn insert_by_created(view: &mut Vec<Request>, request: &Request) {
    let at = view
        .iter()
        .position(|r| r.created_at <= request.created_at)
        .unwrap_or(view.len());
    view.insert(at, request.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::requests::{ActorRef, CheckpostDeletePayload, RequestPayload};
    use chrono::Utc;

    fn pending() -> Request {
        Request::new(
            RequestPayload::CheckpostDelete(CheckpostDeletePayload { checkpost_id: "cp-5".into() }),
            ActorRef { id: "9".into(), display_name: "Kiran".into() },
        )
    }

    fn decided(request: &Request, status: RequestStatus) -> Request {
        let mut r = request.clone();
        r.status = status;
        r.decided_at = Some(Utc::now());
        if status == RequestStatus::Approved {
            r.approved_document_id = Some("cp-5".into());
        }
        r
    }

    fn ev(request: &Request) -> RequestEvent {
        RequestEvent::for_request(request.clone())
    }

    struct FixedQuery {
        pending: Vec<Request>,
        history: Vec<Request>,
    }

    #[async_trait]
    impl RequestQuery for FixedQuery {
        async fn list_pending(&self) -> WorkflowResult<Vec<Request>> {
            Ok(self.pending.clone())
        }

        async fn list_history(&self, page: u32, page_size: u32) -> WorkflowResult<HistoryPage> {
            Ok(HistoryPage {
                items: self.history.clone(),
                page,
                page_size,
                total_count: self.history.len() as u64,
            })
        }
    }

    #[test]
    fn new_pending_requests_are_prepended() {
        let mut session = DashboardSession::new(10);
        let first = pending();
        let second = pending();
        session.apply_event(&ev(&first));
        session.apply_event(&ev(&second));

        let ids: Vec<_> = session.pending().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn duplicate_pending_event_replaces_by_id() {
        let mut session = DashboardSession::new(10);
        let request = pending();
        session.apply_event(&ev(&request));
        session.apply_event(&ev(&request));
        assert_eq!(session.pending().len(), 1);
    }

    #[test]
    fn decision_moves_request_from_pending_to_history() {
        let mut session = DashboardSession::new(10);
        let request = pending();
        session.apply_event(&ev(&request));
        session.apply_event(&ev(&decided(&request, RequestStatus::Approved)));

        assert!(session.pending().is_empty());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].status, RequestStatus::Approved);
        assert_eq!(session.history_total(), 1);
    }

    #[test]
    fn redelivered_decision_is_idempotent() {
        let request = pending();
        let rejected = ev(&decided(&request, RequestStatus::Rejected));

        let mut once = DashboardSession::new(10);
        once.apply_event(&ev(&request));
        once.apply_event(&rejected);

        let mut twice = once.clone();
        twice.apply_event(&rejected);

        assert_eq!(once.pending(), twice.pending());
        assert_eq!(once.history(), twice.history());
        assert_eq!(once.history_total(), twice.history_total());
    }

    #[test]
    fn late_pending_event_does_not_resurrect_decided_request() {
        let mut session = DashboardSession::new(10);
        let request = pending();
        session.apply_event(&ev(&decided(&request, RequestStatus::Approved)));
        session.apply_event(&ev(&request));

        assert!(session.pending().is_empty());
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn history_view_stays_one_page_long() {
        let mut session = DashboardSession::new(2);
        for _ in 0..3 {
            session.apply_event(&ev(&decided(&pending(), RequestStatus::Rejected)));
        }
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history_total(), 3);
    }

    fn decided_at_offset(secs: i64) -> Request {
        let mut request = decided(&pending(), RequestStatus::Rejected);
        request.created_at = Utc::now() + chrono::Duration::seconds(secs);
        request
    }

    #[test]
    fn redelivery_after_truncation_is_ignored() {
        let mut session = DashboardSession::new(2);
        let (x, y, z) = (decided_at_offset(0), decided_at_offset(1), decided_at_offset(2));
        for request in [&x, &y, &z] {
            session.apply_event(&ev(request));
        }
        let before: Vec<_> = session.history().iter().map(|r| r.id).collect();
        assert_eq!(before, vec![z.id, y.id]);
        assert_eq!(session.history_total(), 3);

        session.apply_event(&ev(&x));
        let after: Vec<_> = session.history().iter().map(|r| r.id).collect();
        assert_eq!(after, before);
        assert_eq!(session.history_total(), 3);
    }

    #[test]
    fn late_decision_of_older_request_is_not_put_first() {
        let mut session = DashboardSession::new(10);
        let older = decided_at_offset(-60);
        let newer = decided_at_offset(0);
        session.apply_event(&ev(&newer));
        session.apply_event(&ev(&older));

        let ids: Vec<_> = session.history().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn new_decision_leaves_a_later_page_alone() {
        let shown = decided_at_offset(-60);
        let query = FixedQuery { pending: vec![], history: vec![shown.clone()] };
        let mut session = DashboardSession::new(1);
        session.show_history_page(2, &query).await.unwrap();
        assert_eq!(session.history_page(), 2);

        session.apply_event(&ev(&decided_at_offset(0)));

        assert_eq!(session.history(), &[shown][..]);
        assert_eq!(session.history_total(), 2);
    }

    #[test]
    fn pending_redelivery_after_truncation_stays_out() {
        let mut session = DashboardSession::new(1);
        let first = pending();
        session.apply_event(&ev(&decided(&first, RequestStatus::Approved)));
        session.apply_event(&ev(&decided_at_offset(5)));
        assert!(!session.history().iter().any(|r| r.id == first.id));

        session.apply_event(&ev(&first));
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn resync_replaces_views_wholesale() {
        let mut session = DashboardSession::new(10);
        session.apply_event(&ev(&pending()));

        let server_pending = pending();
        let server_history = decided(&pending(), RequestStatus::Approved);
        let query = FixedQuery {
            pending: vec![server_pending.clone()],
            history: vec![server_history.clone()],
        };

        session.handle(Delivery::Resync { missed: 3 }, &query).await.unwrap();

        assert_eq!(session.pending(), &[server_pending][..]);
        assert_eq!(session.history(), &[server_history][..]);
        assert_eq!(session.history_total(), 1);
    }
}
