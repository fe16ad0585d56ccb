use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BroadcastRepository, EventStream, StreamRepository};
use crate::event_bus::{
    BusError, EventBroadcaster, Result, StreamAttachment, SubscriberPoll,
};
use crate::models::{AgentEvent, EventPayload};

/// How often a blocked consumer refreshes its subscription heartbeat while
/// waiting for new events, so it is not mistaken for an idle one.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// In-memory arena of per-agent broadcasters.
///
/// Operations on different agents never contend: the outer map is only
/// locked to look up or insert an `Arc<EventBroadcaster>`, all per-agent
/// mutation happens under that broadcaster's own lock.
pub struct MemoryBroadcastRepository {
    broadcasters: RwLock<HashMap<String, Arc<EventBroadcaster>>>,
    buffer_capacity: usize,
}

impl MemoryBroadcastRepository {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            broadcasters: RwLock::new(HashMap::new()),
            buffer_capacity,
        }
    }

    /// Look up the agent's broadcaster, creating it lazily on first use
    pub async fn get_or_create(&self, agent_id: &str) -> Arc<EventBroadcaster> {
        {
            let broadcasters = self.broadcasters.read().await;
            if let Some(broadcaster) = broadcasters.get(agent_id) {
                return broadcaster.clone();
            }
        }

        let mut broadcasters = self.broadcasters.write().await;
        broadcasters
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                debug!(agent_id, "created broadcaster");
                Arc::new(EventBroadcaster::new(agent_id, self.buffer_capacity))
            })
            .clone()
    }
}

#[async_trait]
impl BroadcastRepository for MemoryBroadcastRepository {
    async fn save_broadcaster(&self, broadcaster: Arc<EventBroadcaster>) -> Result<()> {
        let mut broadcasters = self.broadcasters.write().await;
        broadcasters.insert(broadcaster.agent_id().to_string(), broadcaster);
        Ok(())
    }

    async fn get_broadcaster(&self, agent_id: &str) -> Result<Option<Arc<EventBroadcaster>>> {
        Ok(self.broadcasters.read().await.get(agent_id).cloned())
    }

    async fn update_broadcaster(&self, broadcaster: Arc<EventBroadcaster>) -> Result<bool> {
        let mut broadcasters = self.broadcasters.write().await;
        if !broadcasters.contains_key(broadcaster.agent_id()) {
            return Ok(false);
        }
        broadcasters.insert(broadcaster.agent_id().to_string(), broadcaster);
        Ok(true)
    }

    async fn delete_broadcaster(&self, agent_id: &str) -> Result<bool> {
        let removed = self.broadcasters.write().await.remove(agent_id);
        if let Some(broadcaster) = &removed {
            // Make sure any stream still parked on the wake channel sees
            // its subscription disappear
            broadcaster.clear_subscribers();
            debug!(agent_id, "deleted broadcaster");
        }
        Ok(removed.is_some())
    }

    async fn list_agent_ids(&self) -> Result<Vec<String>> {
        Ok(self.broadcasters.read().await.keys().cloned().collect())
    }
}

/// In-memory read-side: replay from the buffer, then live continuation via
/// the broadcaster's wake channel.
pub struct MemoryStreamRepository {
    broadcasts: Arc<MemoryBroadcastRepository>,
}

impl MemoryStreamRepository {
    pub fn new(broadcasts: Arc<MemoryBroadcastRepository>) -> Self {
        Self { broadcasts }
    }
}

/// Detaches the stream's subscription when the consumer goes away, however
/// it goes away (cancel, drop, panic in the caller).
struct DetachOnDrop {
    broadcaster: Arc<EventBroadcaster>,
    subscriber_id: Uuid,
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.broadcaster.detach_subscriber(self.subscriber_id);
    }
}

#[async_trait]
impl StreamRepository for MemoryStreamRepository {
    async fn get_events_from_sequence(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<EventStream> {
        let broadcaster = self.broadcasts.get_or_create(agent_id).await;

        // A finished agent's stream is just its remaining history
        if broadcaster.ends_with_done() {
            info!(agent_id, from_sequence, "agent already done, replay only");
            let backlog = broadcaster.events_from(from_sequence)?;
            return Ok(futures_util::stream::iter(backlog.into_iter().map(Ok)).boxed());
        }

        let StreamAttachment {
            subscriber_id,
            backlog,
            mut wake,
        } = broadcaster.attach_subscriber(from_sequence)?;
        info!(agent_id, from_sequence, "opened event stream");
        let agent_id = agent_id.to_string();

        // Owned by the generator from construction, so the subscription is
        // released even if the stream is dropped before its first poll
        let guard = DetachOnDrop {
            broadcaster: broadcaster.clone(),
            subscriber_id,
        };

        let stream = async_stream::stream! {
            let _guard = guard;

            for event in backlog {
                let done = event.is_done();
                yield Ok(event);
                if done {
                    return;
                }
            }

            loop {
                match tokio::time::timeout(HEARTBEAT_INTERVAL, wake.recv()).await {
                    // Quiet period: stay attached, just prove liveness
                    Err(_) => {
                        if !broadcaster.touch_subscriber(subscriber_id) {
                            return;
                        }
                    }
                    Ok(Err(RecvError::Closed)) => return,
                    // A lagged wake receiver lost nothing: the buffer is
                    // re-read from the cursor either way
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {
                        match broadcaster.poll_subscriber(subscriber_id) {
                            SubscriberPoll::Detached => return,
                            SubscriberPoll::Gap {
                                requested,
                                oldest_retained,
                            } => {
                                yield Err(BusError::SequenceGap {
                                    agent_id: agent_id.clone(),
                                    requested,
                                    oldest_retained,
                                });
                                return;
                            }
                            SubscriberPoll::Events(events) => {
                                for event in events {
                                    let done = event.is_done();
                                    yield Ok(event);
                                    if done {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn get_buffered_events(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<AgentEvent>> {
        match self.broadcasts.get_broadcaster(agent_id).await? {
            Some(broadcaster) => broadcaster.events_from(from_sequence),
            None => Ok(Vec::new()),
        }
    }

    async fn notify_new_event(&self, agent_id: &str, payload: EventPayload) -> Result<u64> {
        let broadcaster = self.broadcasts.get_or_create(agent_id).await;
        Ok(broadcaster.broadcast(payload))
    }

    async fn cleanup_agent_stream(&self, agent_id: &str) -> Result<()> {
        if let Some(broadcaster) = self.broadcasts.get_broadcaster(agent_id).await? {
            let removed = broadcaster.clear_subscribers();
            debug!(agent_id, removed, "cleaned up agent stream");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repos() -> (Arc<MemoryBroadcastRepository>, MemoryStreamRepository) {
        let broadcasts = Arc::new(MemoryBroadcastRepository::new(1000));
        let streams = MemoryStreamRepository::new(broadcasts.clone());
        (broadcasts, streams)
    }

    fn message(text: &str) -> EventPayload {
        EventPayload::Message {
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn notify_creates_broadcaster_lazily() {
        let (broadcasts, streams) = repos();
        assert!(broadcasts.get_broadcaster("a1").await.unwrap().is_none());

        let seq = streams.notify_new_event("a1", message("hi")).await.unwrap();
        assert_eq!(seq, 1);
        assert!(broadcasts.get_broadcaster("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stream_replays_then_continues_live() {
        let (_, streams) = repos();
        streams.notify_new_event("a1", message("one")).await.unwrap();
        streams.notify_new_event("a1", message("two")).await.unwrap();

        let mut stream = streams.get_events_from_sequence("a1", 1).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 2);

        streams.notify_new_event("a1", message("three")).await.unwrap();
        let live = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("live event should arrive promptly")
            .unwrap()
            .unwrap();
        assert_eq!(live.sequence, 3);
    }

    #[tokio::test]
    async fn stream_ends_after_done_event() {
        let (_, streams) = repos();
        let mut stream = streams.get_events_from_sequence("a1", 1).await.unwrap();

        streams.notify_new_event("a1", message("work")).await.unwrap();
        streams
            .notify_new_event("a1", EventPayload::Done)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 1);
        assert!(stream.next().await.unwrap().unwrap().is_done());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn finished_agent_gets_replay_only_stream() {
        let (_, streams) = repos();
        streams.notify_new_event("a1", message("work")).await.unwrap();
        streams
            .notify_new_event("a1", EventPayload::Done)
            .await
            .unwrap();

        let events: Vec<_> = streams
            .get_events_from_sequence("a1", 1)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events.last().unwrap().as_ref().unwrap().is_done());
    }

    #[tokio::test]
    async fn dropping_stream_detaches_subscription() {
        let (broadcasts, streams) = repos();
        let stream = streams.get_events_from_sequence("a1", 1).await.unwrap();
        let broadcaster = broadcasts.get_broadcaster("a1").await.unwrap().unwrap();
        assert_eq!(broadcaster.active_subscriber_count(), 1);

        drop(stream);
        assert_eq!(broadcaster.active_subscriber_count(), 0);
    }

    #[tokio::test]
    async fn buffered_events_for_unknown_agent_are_empty() {
        let (_, streams) = repos();
        assert!(streams.get_buffered_events("ghost", 1).await.unwrap().is_empty());
    }
}
