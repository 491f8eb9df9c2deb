use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::utils::notification::Delivery;

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/requests/events", get(request_events))
}

fn to_sse(delivery: Delivery) -> Event {
    match delivery {
        Delivery::Event(event) => Event::default()
            .event("request")
            .json_data(&event)
            .unwrap_or_else(|e| {
                warn!(request_id = %event.request.id, "Failed to encode request event: {}", e);
                Event::default().event("resync").data("{}")
            }),
        Delivery::Resync { missed } => Event::default()
            .event("resync")
            .data(format!("{{\"missed\":{}}}", missed)),
    }
}

/// Live request events for a dashboard session.
///
/// Emits `request` events carrying the changed request, and `resync` when the
/// session fell behind and must re-fetch its pending and history views.
#[utoipa::path(
    get,
    path = "/requests/events",
    responses(
        (status = 200, description = "Server-sent event stream of request changes", content_type = "text/event-stream")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn request_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.engine.bus().subscribe(Uuid::new_v4());
    info!(session_id = %subscription.session_id(), "Dashboard session connected");

    let stream = subscription
        .into_stream()
        .map(|delivery| Ok::<_, Infallible>(to_sse(delivery)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
