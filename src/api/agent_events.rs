use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::models::{AgentEvent, EventPayload};

#[derive(Debug, Deserialize)]
pub struct FromSequenceQuery {
    /// Start of the requested range, 1-based; defaults to the whole log
    pub from_sequence: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub timeout_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub sequence: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriberCountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StreamsCleanupResponse {
    pub cleaned: bool,
}

/// Producer entry point: append one event to the agent's log
pub async fn broadcast_event(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(payload): Json<EventPayload>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let sequence = state.service.broadcast_event(&agent_id, payload).await?;
    Ok(Json(BroadcastResponse { sequence }))
}

/// Snapshot of the retained events, no live continuation
pub async fn get_buffered_events(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<FromSequenceQuery>,
) -> Result<Json<Vec<AgentEvent>>, ApiError> {
    let from_sequence = query.from_sequence.unwrap_or(1);
    let events = state
        .service
        .get_buffered_events(&agent_id, from_sequence)
        .await?;
    Ok(Json(events))
}

pub async fn get_subscriber_count(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<SubscriberCountResponse>, ApiError> {
    let count = state.service.get_agent_subscription_count(&agent_id).await?;
    Ok(Json(SubscriberCountResponse { count }))
}

pub async fn cleanup_inactive_subscribers(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let timeout_minutes = query.timeout_minutes.unwrap_or(30);
    if timeout_minutes <= 0 {
        return Err(ApiError::bad_request("timeout_minutes must be positive"));
    }

    let removed = state
        .service
        .cleanup_inactive_subscribers(&agent_id, chrono::Duration::minutes(timeout_minutes))
        .await?;
    Ok(Json(CleanupResponse { removed }))
}

pub async fn cleanup_agent_streams(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<StreamsCleanupResponse>, ApiError> {
    let cleaned = state.service.cleanup_agent_streams(&agent_id).await?;
    Ok(Json(StreamsCleanupResponse { cleaned }))
}
