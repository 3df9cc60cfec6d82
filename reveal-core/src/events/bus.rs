//! Nudge decision fan-out.
//!
//! Accepted decisions are broadcast to every subscriber (UI layers, tests,
//! the replay harness) over a Tokio broadcast channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::decision::NudgeDecision;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 64;

pub type SharedNudgeBus = Arc<NudgeBus>;

pub struct NudgeBus {
    sender: broadcast::Sender<NudgeDecision>,
}

impl NudgeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedNudgeBus {
        Arc::new(self)
    }

    /// Broadcast a decision. Returns how many subscribers received it; zero
    /// subscribers is not an error.
    pub fn publish(&self, decision: NudgeDecision) -> usize {
        let nudge_id = decision.nudge_id.clone();
        match self.sender.send(decision) {
            Ok(count) => {
                debug!(nudge_id = %nudge_id, receivers = count, "Nudge decision published");
                count
            }
            Err(_) => {
                debug!(nudge_id = %nudge_id, "Nudge decision published (no receivers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NudgeDecision> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NudgeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(id: &str) -> NudgeDecision {
        NudgeDecision {
            nudge_id: id.into(),
            template_id: "tpl_help".into(),
            title: None,
            body: Some("Need a hand?".into()),
            cta_text: None,
            quadrant: None,
            friction_type: None,
            expires_at_ms: None,
            extra: None,
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = NudgeBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(decision("n1")), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.nudge_id, "n1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = NudgeBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(decision("n1")), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = NudgeBus::new().shared();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(decision("n2"));
        assert_eq!(a.recv().await.unwrap().nudge_id, "n2");
        assert_eq!(b.recv().await.unwrap().nudge_id, "n2");
    }
}
