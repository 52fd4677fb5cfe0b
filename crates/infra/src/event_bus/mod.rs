//! In-process `EventPublisher`: an `mpsc`-fan-out bus
//! with the same at-least-once, best-effort semantics the event-sourcing
//! crates in this workspace already assume. The core never depends on this
//! concrete type — only on `taskbridge_ports::EventPublisher` — so a real
//! broker can be swapped in later without touching a handler.

use async_trait::async_trait;
use tokio::sync::broadcast;

use taskbridge_events::EventEnvelope;
use taskbridge_ports::{EventPublisher, PublishError};

/// A published envelope together with the stream it belongs to, for
/// subscribers that only care about routing, not payload decoding.
pub type Published = EventEnvelope<serde_json::Value>;

/// Broadcasts every published envelope to all current subscribers. Slow
/// subscribers that fall behind the channel capacity miss older messages
/// rather than blocking publishers — acceptable here because
/// `taskbridge-service`'s dispatch loop is the only consumer and is meant to
/// keep up in real time; a production deployment would back this with a
/// durable broker instead.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Published>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, envelope: Published) -> Result<(), PublishError> {
        // No active subscribers is not an error: a dev binary run without
        // the dispatch loop attached, or a test asserting on the event
        // store directly, should not see publish fail.
        let _ = self.sender.send(envelope);
        Ok(())
    }
}
