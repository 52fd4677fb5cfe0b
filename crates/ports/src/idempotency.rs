//! The `IdempotencyStore` port: leases keyed by `(handlerName, eventId)`
//! against a handler's triggering event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A lease record for one handler's processing of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub handler_name: String,
    pub event_id: String,
    pub leased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("an unexpired lease for ({handler_name}, {event_id}) is already held")]
    AlreadyLeased {
        handler_name: String,
        event_id: String,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Prevents two concurrent workers from both executing the same handler for
/// the same event. A lease is acquired before side-effecting work begins and
/// released (marked completed) after the resulting event is durably
/// appended. An expired, uncompleted lease is eligible for takeover — this
/// is the mechanism that recovers from a worker crashing mid-handler, in
/// concert with deterministic event ids letting the new owner republish
/// rather than redo.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Attempt to acquire a lease, succeeding if none exists or the existing
    /// one has expired and was not completed.
    async fn try_acquire(
        &self,
        handler_name: &str,
        event_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, IdempotencyError>;

    /// Mark a lease completed so it is never taken over, even after expiry.
    async fn complete(&self, handler_name: &str, event_id: &str) -> Result<(), IdempotencyError>;
}

#[async_trait]
impl<S> IdempotencyStore for std::sync::Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    async fn try_acquire(
        &self,
        handler_name: &str,
        event_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        (**self)
            .try_acquire(handler_name, event_id, lease_duration, now)
            .await
    }

    async fn complete(&self, handler_name: &str, event_id: &str) -> Result<(), IdempotencyError> {
        (**self).complete(handler_name, event_id).await
    }
}
