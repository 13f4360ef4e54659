//! Fire-and-forget game events for notification collaborators (achievements,
//! live feed). Delivery is best-effort: a subscriber failure or absence can
//! never abort or roll back the session transaction that produced the event.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    SessionStarted {
        session_id: Uuid,
        player_id: String,
        currency_code: String,
        stake_minor: i64,
    },
    DrawResolved {
        session_id: Uuid,
        draw_index: u32,
        is_zero: bool,
        payout_minor: i64,
        cashout_balance_minor: i64,
    },
    SessionPaused {
        session_id: Uuid,
        fee_minor: i64,
    },
    SessionResumed {
        session_id: Uuid,
    },
    CashedOut {
        session_id: Uuid,
        player_id: String,
        credited_minor: i64,
    },
    SessionLost {
        session_id: Uuid,
        player_id: String,
        draw_index: u32,
    },
    SessionExpired {
        session_id: Uuid,
        player_id: String,
    },
}

/// Broadcast bus for game events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A send error just means nobody is listening.
    pub fn publish(&self, event: GameEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!("no event subscribers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_delivered() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(GameEvent::SessionResumed {
            session_id: Uuid::new_v4(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, GameEvent::SessionResumed { .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(16);
        bus.publish(GameEvent::SessionResumed {
            session_id: Uuid::new_v4(),
        });
    }
}
