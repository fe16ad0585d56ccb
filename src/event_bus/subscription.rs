use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// One consumer's cursor and liveness state.
///
/// The cursor is the next unread sequence; it advances as the consumer
/// drains the buffer. `last_heartbeat` is refreshed on every successful
/// read (and periodically while the consumer is blocked waiting), and is
/// what the cleanup sweep checks for idle eviction.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub agent_id: String,
    pub cursor: u64,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub is_active: bool,
}

impl Subscription {
    pub fn new(agent_id: impl Into<String>, cursor: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            cursor,
            created_at: now,
            last_heartbeat: now,
            is_active: true,
        }
    }

    /// Refresh the liveness heartbeat
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    /// Whether this subscription should be evicted by a sweep with the
    /// given idle timeout
    pub fn is_idle(&self, idle_timeout: Duration, now: DateTime<Utc>) -> bool {
        !self.is_active || self.last_heartbeat < now - idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_subscription_is_not_idle() {
        let sub = Subscription::new("a1", 1);
        assert!(sub.is_active);
        assert!(!sub.is_idle(Duration::minutes(30), Utc::now()));
    }

    #[test]
    fn stale_heartbeat_is_idle() {
        let mut sub = Subscription::new("a1", 1);
        sub.last_heartbeat = Utc::now() - Duration::minutes(31);
        assert!(sub.is_idle(Duration::minutes(30), Utc::now()));
    }

    #[test]
    fn deactivated_subscription_is_idle_regardless_of_heartbeat() {
        let mut sub = Subscription::new("a1", 1);
        sub.deactivate();
        assert!(sub.is_idle(Duration::minutes(30), Utc::now()));
    }
}
