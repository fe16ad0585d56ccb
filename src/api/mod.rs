pub mod agent_events;
pub mod agent_stream;
pub mod error;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::service::EventBusService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EventBusService>,
}

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/agents/:agent_id/events",
            post(agent_events::broadcast_event).get(agent_events::get_buffered_events),
        )
        .route(
            "/api/agents/:agent_id/events/stream",
            get(agent_stream::stream_agent_events),
        )
        .route(
            "/api/agents/:agent_id/subscribers/count",
            get(agent_events::get_subscriber_count),
        )
        .route(
            "/api/agents/:agent_id/subscribers/cleanup",
            post(agent_events::cleanup_inactive_subscribers),
        )
        .route(
            "/api/agents/:agent_id/streams",
            delete(agent_events::cleanup_agent_streams),
        )
        .with_state(state)
}
