use std::collections::VecDeque;

use chrono::Utc;

use super::{BusError, Result};
use crate::models::{AgentEvent, EventPayload};

/// Default retention bound, in events, for one agent's buffer
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Ordered, gapless, sequence-numbered append log for one agent.
///
/// The buffer is always a contiguous suffix of the conceptual full log:
/// once it reaches `max_events`, appending evicts the oldest entry, and a
/// reader asking for an evicted sequence gets `BusError::SequenceGap`
/// instead of a silently truncated result.
#[derive(Debug)]
pub struct EventBuffer {
    agent_id: String,
    max_events: usize,
    events: VecDeque<AgentEvent>,
    current_sequence: u64,
}

impl EventBuffer {
    pub fn new(agent_id: impl Into<String>, max_events: usize) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_events: max_events.max(1),
            events: VecDeque::new(),
            current_sequence: 0,
        }
    }

    /// Sequence of the last appended event, 0 if nothing was ever appended
    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    /// Oldest sequence still retained. When the buffer holds no events this
    /// is `current_sequence + 1`, i.e. the next sequence to be assigned.
    pub fn oldest_retained(&self) -> u64 {
        self.events
            .front()
            .map_or(self.current_sequence + 1, |e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append a payload, assigning the next sequence. Returns the assigned
    /// sequence. Evicts the oldest event when the retention bound is hit.
    pub fn append(&mut self, payload: EventPayload) -> u64 {
        let sequence = self.current_sequence + 1;

        // Contiguity is the core invariant of the bus; a violation here
        // means the caller broke the per-agent exclusion and must be loud.
        assert!(
            self.events.back().map_or(true, |e| e.sequence + 1 == sequence),
            "non-contiguous sequence assignment for agent {}",
            self.agent_id
        );

        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }

        self.events.push_back(AgentEvent {
            sequence,
            agent_id: self.agent_id.clone(),
            created_at: Utc::now(),
            payload,
        });
        self.current_sequence = sequence;
        sequence
    }

    /// All retained events with `sequence >= from_sequence`, ascending.
    ///
    /// Requests below `oldest_retained` for sequences that did exist fail
    /// with `SequenceGap`; requests beyond `current_sequence` return an
    /// empty list ("no new events yet").
    pub fn events_from(&self, from_sequence: u64) -> Result<Vec<AgentEvent>> {
        let from = from_sequence.max(1);
        let oldest = self.oldest_retained();

        if from < oldest && from <= self.current_sequence {
            return Err(BusError::SequenceGap {
                agent_id: self.agent_id.clone(),
                requested: from,
                oldest_retained: oldest,
            });
        }

        if from > self.current_sequence {
            return Ok(Vec::new());
        }

        let skip = (from - oldest) as usize;
        Ok(self.events.iter().skip(skip).cloned().collect())
    }

    /// Whether the last buffered event is a terminal `done` event
    pub fn ends_with_done(&self) -> bool {
        self.events.back().is_some_and(|e| e.is_done())
    }

    /// Drop all retained events. The sequence counter is not reset: the
    /// monotonicity invariant holds for the lifetime of the agent.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> EventPayload {
        EventPayload::Message {
            message: text.to_string(),
        }
    }

    #[test]
    fn append_assigns_sequences_from_one() {
        let mut buffer = EventBuffer::new("a1", 10);
        assert_eq!(buffer.append(message("first")), 1);
        assert_eq!(buffer.append(message("second")), 2);
        assert_eq!(buffer.current_sequence(), 2);
        assert_eq!(buffer.oldest_retained(), 1);
    }

    #[test]
    fn events_from_returns_ordered_suffix() {
        let mut buffer = EventBuffer::new("a1", 100);
        for i in 0..10 {
            buffer.append(message(&format!("e{i}")));
        }
        let events = buffer.events_from(5).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn events_from_beyond_head_is_empty_not_gap() {
        let mut buffer = EventBuffer::new("a1", 100);
        buffer.append(message("only"));
        assert!(buffer.events_from(2).unwrap().is_empty());
        assert!(buffer.events_from(99).unwrap().is_empty());
    }

    #[test]
    fn empty_buffer_has_no_gap() {
        let buffer = EventBuffer::new("a1", 100);
        assert!(buffer.events_from(1).unwrap().is_empty());
    }

    #[test]
    fn eviction_produces_sequence_gap() {
        let mut buffer = EventBuffer::new("a1", 3);
        for i in 0..5 {
            buffer.append(message(&format!("e{i}")));
        }
        // Events 1 and 2 were evicted by the retention bound
        assert_eq!(buffer.oldest_retained(), 3);
        match buffer.events_from(1) {
            Err(BusError::SequenceGap {
                requested,
                oldest_retained,
                ..
            }) => {
                assert_eq!(requested, 1);
                assert_eq!(oldest_retained, 3);
            }
            other => panic!("expected SequenceGap, got {other:?}"),
        }
        // The retained window itself is still readable
        let sequences: Vec<u64> = buffer
            .events_from(3)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[test]
    fn ends_with_done_tracks_last_event() {
        let mut buffer = EventBuffer::new("a1", 10);
        assert!(!buffer.ends_with_done());
        buffer.append(message("work"));
        assert!(!buffer.ends_with_done());
        buffer.append(EventPayload::Done);
        assert!(buffer.ends_with_done());
    }

    #[test]
    fn clear_keeps_sequence_counter() {
        let mut buffer = EventBuffer::new("a1", 10);
        buffer.append(message("one"));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.append(message("two")), 2);
    }
}
