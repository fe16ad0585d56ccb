mod broadcaster;
mod buffer;
mod subscription;

pub use broadcaster::{EventBroadcaster, StreamAttachment, SubscriberPoll};
pub use buffer::{EventBuffer, DEFAULT_MAX_EVENTS};
pub use subscription::Subscription;

use thiserror::Error;

/// Errors surfaced by the event bus.
///
/// Unknown agent ids are deliberately not an error anywhere in the bus:
/// callers routinely probe agents that have already completed and been
/// cleaned up, so those paths return zero/false/empty instead.
#[derive(Debug, Error)]
pub enum BusError {
    /// The requested sequence has already been evicted from the buffer's
    /// retention window. Distinct from "no new events yet" so the caller
    /// can restart from `oldest_retained` or surface a warning.
    #[error(
        "agent {agent_id}: requested sequence {requested} is below the oldest retained sequence {oldest_retained}"
    )]
    SequenceGap {
        agent_id: String,
        requested: u64,
        oldest_retained: u64,
    },

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
