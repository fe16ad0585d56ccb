pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::event_bus::{EventBroadcaster, Result};
use crate::models::{AgentEvent, EventPayload};

pub use memory::{MemoryBroadcastRepository, MemoryStreamRepository};

/// Replay-then-live event stream handed to one consumer. Infinite until the
/// consumer drops it, the agent emits `done`, or the subscription is
/// evicted; a mid-stream `SequenceGap` is yielded as an `Err` item before
/// the stream ends.
pub type EventStream = BoxStream<'static, Result<AgentEvent>>;

/// Persistence/lookup of per-agent broadcaster state.
///
/// The in-memory map is the reference implementation; a persistent one must
/// keep sequence monotonicity per agent_id across restarts.
#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    async fn save_broadcaster(&self, broadcaster: Arc<EventBroadcaster>) -> Result<()>;

    async fn get_broadcaster(&self, agent_id: &str) -> Result<Option<Arc<EventBroadcaster>>>;

    /// Re-persist a broadcaster after its subscriber set changed. Returns
    /// false when the broadcaster is not known to this repository.
    async fn update_broadcaster(&self, broadcaster: Arc<EventBroadcaster>) -> Result<bool>;

    async fn delete_broadcaster(&self, agent_id: &str) -> Result<bool>;

    /// Agent ids with live broadcaster state, for cleanup sweeps
    async fn list_agent_ids(&self) -> Result<Vec<String>>;
}

/// Read-side of the bus: buffered replay plus live continuation, and the
/// producer-facing notification entry point.
#[async_trait]
pub trait StreamRepository: Send + Sync {
    /// Open an event stream for one consumer: everything retained at or
    /// after `from_sequence`, then live events as they are appended.
    /// Creates the agent's broadcaster lazily.
    async fn get_events_from_sequence(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<EventStream>;

    /// One-shot snapshot, no live continuation
    async fn get_buffered_events(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<AgentEvent>>;

    /// Append an event and wake the agent's subscribers. Creates the
    /// broadcaster lazily; returns the assigned sequence.
    async fn notify_new_event(&self, agent_id: &str, payload: EventPayload) -> Result<u64>;

    /// Detach every subscriber of the agent's stream
    async fn cleanup_agent_stream(&self, agent_id: &str) -> Result<()>;
}
