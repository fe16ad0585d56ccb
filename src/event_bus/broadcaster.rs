use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::buffer::EventBuffer;
use super::subscription::Subscription;
use super::Result;
use crate::models::{AgentEvent, EventPayload};

/// Capacity of the per-agent wake channel. The channel only signals "new
/// sequence available"; consumers re-read the buffer, so a lagged receiver
/// loses nothing.
const WAKE_CHANNEL_CAPACITY: usize = 256;

/// Everything a freshly attached subscriber needs: its id, the backlog
/// snapshot taken under the broadcaster lock, and a wake receiver that was
/// subscribed under the same lock, so no event can fall between catch-up
/// and the live path.
pub struct StreamAttachment {
    pub subscriber_id: Uuid,
    pub backlog: Vec<AgentEvent>,
    pub wake: broadcast::Receiver<u64>,
}

/// Outcome of draining a subscriber's cursor after a wake-up
#[derive(Debug)]
pub enum SubscriberPoll {
    /// The subscription no longer exists (evicted or cleaned up)
    Detached,
    /// Events at or after the cursor, in order; may be empty. The cursor
    /// and heartbeat have been advanced.
    Events(Vec<AgentEvent>),
    /// The cursor fell behind the retention window; the subscription has
    /// been removed and the consumer must resubscribe.
    Gap { requested: u64, oldest_retained: u64 },
}

struct Inner {
    buffer: EventBuffer,
    subscribers: HashMap<Uuid, Subscription>,
}

/// Per-agent owner of the event buffer and its live subscribers.
///
/// Buffer and subscriber set are mutated under one lock so the ordering
/// invariant holds; the lock is never held across an await. Delivery is
/// pull-based: `broadcast` appends and fires the wake channel, and each
/// consumer re-reads `events_from` its own cursor at its own pace.
pub struct EventBroadcaster {
    agent_id: String,
    inner: Mutex<Inner>,
    wake: broadcast::Sender<u64>,
}

impl EventBroadcaster {
    pub fn new(agent_id: impl Into<String>, max_events: usize) -> Self {
        let agent_id = agent_id.into();
        let (wake, _) = broadcast::channel(WAKE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                buffer: EventBuffer::new(agent_id.clone(), max_events),
                subscribers: HashMap::new(),
            }),
            agent_id,
            wake,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("event bus lock poisoned")
    }

    /// Append an event and wake all attached subscribers. Returns the
    /// assigned sequence. Serializes under the per-agent lock, so two
    /// concurrent broadcasts can never share a sequence.
    pub fn broadcast(&self, payload: EventPayload) -> u64 {
        let sequence = {
            let mut inner = self.lock();
            inner.buffer.append(payload)
        };
        // No receivers is fine: the buffer already holds the event
        let _ = self.wake.send(sequence);
        debug!(agent_id = %self.agent_id, sequence, "broadcast event");
        sequence
    }

    pub fn current_sequence(&self) -> u64 {
        self.lock().buffer.current_sequence()
    }

    pub fn ends_with_done(&self) -> bool {
        self.lock().buffer.ends_with_done()
    }

    /// Snapshot of retained events with `sequence >= from_sequence`
    pub fn events_from(&self, from_sequence: u64) -> Result<Vec<AgentEvent>> {
        self.lock().buffer.events_from(from_sequence)
    }

    /// Register a subscription starting at `from_sequence`.
    ///
    /// Fails with `SequenceGap` (without attaching) when the requested
    /// sequence has already been evicted.
    pub fn attach_subscriber(&self, from_sequence: u64) -> Result<StreamAttachment> {
        let mut inner = self.lock();
        let backlog = inner.buffer.events_from(from_sequence)?;
        let cursor = backlog
            .last()
            .map(|e| e.sequence + 1)
            .unwrap_or_else(|| from_sequence.max(1));

        let subscription = Subscription::new(&self.agent_id, cursor);
        let subscriber_id = subscription.id;
        inner.subscribers.insert(subscriber_id, subscription);
        let wake = self.wake.subscribe();

        debug!(
            agent_id = %self.agent_id,
            subscriber_id = %subscriber_id,
            from_sequence,
            backlog = backlog.len(),
            "attached subscriber"
        );

        Ok(StreamAttachment {
            subscriber_id,
            backlog,
            wake,
        })
    }

    pub fn detach_subscriber(&self, subscriber_id: Uuid) -> bool {
        let removed = self.lock().subscribers.remove(&subscriber_id).is_some();
        if removed {
            debug!(
                agent_id = %self.agent_id,
                subscriber_id = %subscriber_id,
                "detached subscriber"
            );
        }
        removed
    }

    /// Drain the subscriber's cursor: refresh its heartbeat and return the
    /// events appended since its last read.
    pub fn poll_subscriber(&self, subscriber_id: Uuid) -> SubscriberPoll {
        let mut inner = self.lock();

        let Some(subscription) = inner.subscribers.get_mut(&subscriber_id) else {
            return SubscriberPoll::Detached;
        };
        subscription.touch();
        let cursor = subscription.cursor;

        match inner.buffer.events_from(cursor) {
            Ok(events) => {
                if let Some(last) = events.last() {
                    let next = last.sequence + 1;
                    if let Some(subscription) = inner.subscribers.get_mut(&subscriber_id) {
                        subscription.cursor = next;
                    }
                }
                SubscriberPoll::Events(events)
            }
            Err(_) => {
                // Forced resynchronization: the retention window moved past
                // this cursor, so the subscription is no longer servable.
                let oldest = inner.buffer.oldest_retained();
                inner.subscribers.remove(&subscriber_id);
                SubscriberPoll::Gap {
                    requested: cursor,
                    oldest_retained: oldest,
                }
            }
        }
    }

    /// Refresh a subscriber's heartbeat without reading. Returns false when
    /// the subscription no longer exists.
    pub fn touch_subscriber(&self, subscriber_id: Uuid) -> bool {
        let mut inner = self.lock();
        match inner.subscribers.get_mut(&subscriber_id) {
            Some(subscription) => {
                subscription.touch();
                true
            }
            None => false,
        }
    }

    pub fn active_subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|s| s.is_active)
            .count()
    }

    /// Evict subscriptions idle past `idle_timeout`. Returns how many were
    /// removed. Evicted consumers are woken so their streams observe the
    /// removal promptly.
    pub fn cleanup_inactive(&self, idle_timeout: Duration) -> usize {
        let removed = {
            let mut inner = self.lock();
            let now = Utc::now();
            let before = inner.subscribers.len();
            inner.subscribers.retain(|_, s| !s.is_idle(idle_timeout, now));
            before - inner.subscribers.len()
        };
        if removed > 0 {
            let _ = self.wake.send(self.current_sequence());
            debug!(
                agent_id = %self.agent_id,
                removed,
                "evicted idle subscribers"
            );
        }
        removed
    }

    /// Detach every subscriber (agent stream teardown). Returns how many
    /// were removed.
    pub fn clear_subscribers(&self) -> usize {
        let removed = {
            let mut inner = self.lock();
            let before = inner.subscribers.len();
            for subscription in inner.subscribers.values_mut() {
                subscription.deactivate();
            }
            inner.subscribers.clear();
            before
        };
        if removed > 0 {
            let _ = self.wake.send(self.current_sequence());
        }
        removed
    }

    #[cfg(test)]
    fn backdate_subscriber(&self, subscriber_id: Uuid, age: Duration) {
        let mut inner = self.lock();
        if let Some(subscription) = inner.subscribers.get_mut(&subscriber_id) {
            subscription.last_heartbeat = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::BusError;

    fn message(text: &str) -> EventPayload {
        EventPayload::Message {
            message: text.to_string(),
        }
    }

    #[test]
    fn broadcast_assigns_monotonic_sequences() {
        let broadcaster = EventBroadcaster::new("a1", 100);
        assert_eq!(broadcaster.broadcast(message("one")), 1);
        assert_eq!(broadcaster.broadcast(message("two")), 2);
        assert_eq!(broadcaster.current_sequence(), 2);
    }

    #[test]
    fn concurrent_broadcasts_never_share_a_sequence() {
        use std::sync::Arc;

        let broadcaster = Arc::new(EventBroadcaster::new("a1", 2048));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let broadcaster = broadcaster.clone();
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .map(|i| broadcaster.broadcast(message(&format!("m{i}"))))
                    .collect::<Vec<u64>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u64> = (1..=400).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn attach_snapshots_backlog_and_sets_cursor() {
        let broadcaster = EventBroadcaster::new("a1", 100);
        broadcaster.broadcast(message("one"));
        broadcaster.broadcast(message("two"));

        let attachment = broadcaster.attach_subscriber(1).unwrap();
        assert_eq!(attachment.backlog.len(), 2);

        // Nothing new yet
        match broadcaster.poll_subscriber(attachment.subscriber_id) {
            SubscriberPoll::Events(events) => assert!(events.is_empty()),
            other => panic!("unexpected poll result: {other:?}"),
        }

        broadcaster.broadcast(message("three"));
        match broadcaster.poll_subscriber(attachment.subscriber_id) {
            SubscriberPoll::Events(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].sequence, 3);
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn attach_below_retention_window_is_rejected() {
        let broadcaster = EventBroadcaster::new("a1", 2);
        for i in 0..5 {
            broadcaster.broadcast(message(&format!("m{i}")));
        }
        match broadcaster.attach_subscriber(1) {
            Err(BusError::SequenceGap {
                requested,
                oldest_retained,
                ..
            }) => {
                assert_eq!(requested, 1);
                assert_eq!(oldest_retained, 4);
            }
            other => panic!("expected SequenceGap, got {:?}", other.map(|_| ())),
        }
        assert_eq!(broadcaster.active_subscriber_count(), 0);
    }

    #[test]
    fn slow_subscriber_that_falls_behind_gets_gap_and_is_removed() {
        let broadcaster = EventBroadcaster::new("a1", 2);
        broadcaster.broadcast(message("one"));
        let attachment = broadcaster.attach_subscriber(1).unwrap();

        // Push the retention window past the subscriber's cursor (2)
        for i in 0..4 {
            broadcaster.broadcast(message(&format!("m{i}")));
        }

        match broadcaster.poll_subscriber(attachment.subscriber_id) {
            SubscriberPoll::Gap {
                requested,
                oldest_retained,
            } => {
                assert_eq!(requested, 2);
                assert_eq!(oldest_retained, 4);
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert_eq!(broadcaster.active_subscriber_count(), 0);
    }

    #[test]
    fn cleanup_inactive_only_evicts_stale_subscribers() {
        let broadcaster = EventBroadcaster::new("a1", 100);
        let stale = broadcaster.attach_subscriber(1).unwrap();
        let fresh = broadcaster.attach_subscriber(1).unwrap();
        broadcaster.backdate_subscriber(stale.subscriber_id, Duration::minutes(45));

        assert_eq!(broadcaster.cleanup_inactive(Duration::minutes(30)), 1);
        assert_eq!(broadcaster.active_subscriber_count(), 1);
        assert!(broadcaster.touch_subscriber(fresh.subscriber_id));
        assert!(!broadcaster.touch_subscriber(stale.subscriber_id));
    }

    #[test]
    fn clear_subscribers_removes_everything() {
        let broadcaster = EventBroadcaster::new("a1", 100);
        broadcaster.attach_subscriber(1).unwrap();
        broadcaster.attach_subscriber(1).unwrap();
        assert_eq!(broadcaster.clear_subscribers(), 2);
        assert_eq!(broadcaster.active_subscriber_count(), 0);
        // Idempotent
        assert_eq!(broadcaster.clear_subscribers(), 0);
    }
}
