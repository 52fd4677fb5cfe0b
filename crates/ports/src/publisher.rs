//! The `EventPublisher` port: fan-out of appended events to downstream
//! handlers and external subscribers.

use async_trait::async_trait;
use thiserror::Error;

use taskbridge_events::EventEnvelope;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed: {0}")]
    Backend(String),
}

/// Publishes a stored, already-durable event. Handlers call this only after
/// a successful `EventStore::append` — publication is a side effect of a
/// fact that already happened, never a substitute for durability. At-least-
/// once delivery is assumed: subscribers (the next handler in the chain,
/// external webhooks) must be idempotent on the envelope's `id`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        envelope: EventEnvelope<serde_json::Value>,
    ) -> Result<(), PublishError>;
}

#[async_trait]
impl<S> EventPublisher for std::sync::Arc<S>
where
    S: EventPublisher + ?Sized,
{
    async fn publish(
        &self,
        envelope: EventEnvelope<serde_json::Value>,
    ) -> Result<(), PublishError> {
        (**self).publish(envelope).await
    }
}
