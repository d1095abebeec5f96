use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use events::{EventEnvelope, ProgressEvent};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::state::AppState;

pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Comma-separated tracking IDs to filter progress events.
    pub tracking_ids: Option<String>,
}

fn parse_tracking_ids(tracking_ids: Option<&str>) -> Option<Vec<Uuid>> {
    tracking_ids.map(|s| {
        s.split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    })
}

/// Sequence number from a reconnecting client's `Last-Event-ID`.
pub fn last_event_seq(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

pub fn progress_to_sse_event(event: &ProgressEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(event.seq.to_string())
        .event(event.kind.as_str())
        .data(data))
}

fn envelope_to_sse_event(envelope: &EventEnvelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.id.to_string())
        .event(envelope.event.event_type())
        .data(data))
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "SSE stream of every provisioning and session event"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tracking_ids = parse_tracking_ids(query.tracking_ids.as_deref());

    let stream = state.event_bus.stream().filter_map(move |envelope| {
        let keep = match (&tracking_ids, envelope.event.tracking_id()) {
            (Some(ids), Some(id)) => ids.contains(&id),
            _ => true,
        };
        async move { keep.then(|| envelope_to_sse_event(&envelope)) }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
