use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::event_bus::Result;
use crate::models::{AgentEvent, EventPayload};
use crate::repository::{BroadcastRepository, EventStream, StreamRepository};

/// Stateless façade over the broadcast and stream repositories.
///
/// Every call is fully described by its arguments; all state lives behind
/// the repositories, so the service can be cloned and shared freely.
pub struct EventBusService {
    broadcasts: Arc<dyn BroadcastRepository>,
    streams: Arc<dyn StreamRepository>,
}

impl EventBusService {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepository>,
        streams: Arc<dyn StreamRepository>,
    ) -> Self {
        Self {
            broadcasts,
            streams,
        }
    }

    /// Append an event to the agent's log and wake its subscribers.
    /// Returns the assigned sequence.
    pub async fn broadcast_event(&self, agent_id: &str, payload: EventPayload) -> Result<u64> {
        debug!(agent_id, kind = payload.kind(), "broadcasting event");
        self.streams.notify_new_event(agent_id, payload).await
    }

    /// Open a replay-then-live stream from `from_sequence`. Two calls with
    /// the same arguments are fully independent streams.
    pub async fn get_event_stream(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<EventStream> {
        self.streams
            .get_events_from_sequence(agent_id, from_sequence)
            .await
    }

    /// One-shot snapshot of the retained events from `from_sequence`
    pub async fn get_buffered_events(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<AgentEvent>> {
        self.streams.get_buffered_events(agent_id, from_sequence).await
    }

    /// Active subscriber count; 0 when the agent has no broadcaster
    pub async fn get_agent_subscription_count(&self, agent_id: &str) -> Result<usize> {
        match self.broadcasts.get_broadcaster(agent_id).await? {
            Some(broadcaster) => Ok(broadcaster.active_subscriber_count()),
            None => Ok(0),
        }
    }

    /// Tear down all streams and the broadcaster itself for an agent.
    /// Idempotent: returns true whether or not anything existed.
    pub async fn cleanup_agent_streams(&self, agent_id: &str) -> Result<bool> {
        info!(agent_id, "cleaning up agent streams");
        self.streams.cleanup_agent_stream(agent_id).await?;
        self.broadcasts.delete_broadcaster(agent_id).await?;
        Ok(true)
    }

    /// Evict subscriptions idle past `idle_timeout`; 0 when the agent has
    /// no broadcaster.
    pub async fn cleanup_inactive_subscribers(
        &self,
        agent_id: &str,
        idle_timeout: Duration,
    ) -> Result<usize> {
        let Some(broadcaster) = self.broadcasts.get_broadcaster(agent_id).await? else {
            return Ok(0);
        };

        let removed = broadcaster.cleanup_inactive(idle_timeout);
        if removed > 0 {
            self.broadcasts.update_broadcaster(broadcaster).await?;
            info!(agent_id, removed, "cleaned up inactive subscribers");
        }
        Ok(removed)
    }

    /// Agents with live broadcaster state, for the cleanup sweep
    pub async fn active_agents(&self) -> Result<Vec<String>> {
        self.broadcasts.list_agent_ids().await
    }
}
