//! The `EventStore` port: an append-only,
//! optimistic-concurrency-guarded stream per `RequestId`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use taskbridge_core::RequestId;
use taskbridge_events::WorkflowEvent;

/// An event ready to be appended to a stream, not yet assigned a version.
///
/// `id` is always the deterministic id from `create_deterministic` — never a
/// random one — so that appending the same logical event twice (a retried
/// handler) is detected as a duplicate rather than creating a second row.
#[derive(Debug, Clone, PartialEq)]
pub struct UncommittedEvent {
    pub id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed catalog event and its
    /// already-computed deterministic id.
    pub fn from_typed(
        id: impl Into<String>,
        event: &WorkflowEvent,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> Result<Self, EventStoreError> {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            id: id.into(),
            event_type: taskbridge_events::Event::event_type(event).to_string(),
            occurred_at: taskbridge_events::Event::occurred_at(event),
            correlation_id,
            causation_id,
            payload,
        })
    }
}

/// A stored event: an `UncommittedEvent` plus its assigned stream version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub request_id: RequestId,
    /// Monotonically increasing position in the `request_id` stream, starting at 1.
    pub version: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.version
    }

    /// Decode the stored JSON payload back into the typed catalog event.
    pub fn to_typed(&self) -> Result<WorkflowEvent, EventStoreError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload decode failed: {e}")))
    }
}

/// Optimistic concurrency expectation for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must currently be at exactly this version.
    Exact(u64),
    /// No expectation; append unconditionally at the stream's current tail.
    /// Used only when a caller has already established exclusivity another
    /// way (deterministic-id republish), never for ordinary command handling.
    Any,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: expected version {expected:?}, found {actual}")]
    Concurrency { expected: ExpectedVersion, actual: u64 },

    #[error("event {0} already exists in this stream at a different version")]
    DuplicateEventId(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Append-only event store keyed by `RequestId`.
///
/// Implementations must:
/// - enforce optimistic concurrency against `expected_version`
/// - assign strictly increasing versions starting at 1
/// - treat an event whose `id` already exists in the stream as a no-op
///   success rather than a duplicate-key error, returning the
///   previously-stored event — this is what makes append idempotent under
///   deterministic ids
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        request_id: &RequestId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a request, in version order.
    async fn load_stream(&self, request_id: &RequestId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Look up a single stored event by its deterministic id within a stream,
    /// without loading the whole stream. Used by the deterministic-republish
    /// path on handler-crash recovery.
    async fn find_by_id(
        &self,
        request_id: &RequestId,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for std::sync::Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        request_id: &RequestId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(request_id, events, expected_version).await
    }

    async fn load_stream(&self, request_id: &RequestId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(request_id).await
    }

    async fn find_by_id(
        &self,
        request_id: &RequestId,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        (**self).find_by_id(request_id, event_id).await
    }
}
