use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::warn;

use super::error::ApiError;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Resume point for reconnecting clients: the sequence after the last
    /// one they saw. Defaults to 1 (full replay).
    pub from_sequence: Option<u64>,
}

/// SSE endpoint serving the replay-then-live event stream.
///
/// Each event's SSE id is its sequence, so a client can reconnect with
/// `from_sequence = last seen + 1` and resume exactly where it left off.
/// A mid-stream gap is surfaced as a `sequence_gap` SSE event before the
/// stream closes; an initial gap fails the request with 410.
pub async fn stream_agent_events(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let from_sequence = query.from_sequence.unwrap_or(1);
    let stream = state
        .service
        .get_event_stream(&agent_id, from_sequence)
        .await?;

    let sse_stream = stream.map(move |item| {
        let sse_event = match item {
            Ok(event) => SseEvent::default()
                .id(event.sequence.to_string())
                .event(event.kind())
                .json_data(&event)
                .unwrap_or_else(|e| {
                    warn!("failed to serialize event for SSE: {e}");
                    SseEvent::default()
                        .event("error")
                        .data("event serialization failed")
                }),
            Err(e) => SseEvent::default().event("sequence_gap").data(e.to_string()),
        };
        Ok(sse_event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
