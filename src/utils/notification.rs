use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::models::requests::RequestEvent;

/// What a subscriber receives from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(RequestEvent),
    /// The subscriber fell behind and `missed` events were dropped; its views
    /// must be re-fetched.
    Resync { missed: u64 },
}

/// Fan-out of request change events to every connected dashboard session.
///
/// Delivery is best-effort: sessions that are not subscribed when an event is
/// published never see it. A single channel carries all events, so each
/// subscriber observes them in publish order.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<RequestEvent>,
    sessions: Arc<Mutex<HashSet<Uuid>>>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sessions: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Broadcast `event`; returns how many subscribers it was handed to.
    pub fn publish(&self, event: RequestEvent) -> usize {
        let request_id = event.request.id;
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(%request_id, receivers, "Published request event");
                receivers
            }
            Err(_) => {
                debug!(%request_id, "No subscribers for request event");
                0
            }
        }
    }

    pub fn subscribe(&self, session_id: Uuid) -> Subscription {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id);
        }
        debug!(%session_id, "Session subscribed");
        Subscription {
            session_id,
            receiver: self.sender.subscribe(),
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn connected(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// A live feed for one session. Dropping it unsubscribes.
pub struct Subscription {
    session_id: Uuid,
    receiver: broadcast::Receiver<RequestEvent>,
    sessions: Arc<Mutex<HashSet<Uuid>>>,
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the next delivery; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(RecvError::Lagged(missed)) => {
                warn!(session_id = %self.session_id, missed, "Session lagged behind the event bus");
                Some(Delivery::Resync { missed })
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(TryRecvError::Lagged(missed)) => Some(Delivery::Resync { missed }),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|delivery| (delivery, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
        debug!(session_id = %self.session_id, "Session unsubscribed");
    }
}
