//! In-memory `EventStore`: intended for tests and the local `service`
//! binary's dev mode. Not optimized for performance.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use taskbridge_core::RequestId;
use taskbridge_ports::{EventStore, EventStoreError, ExpectedVersion, StoredEvent, UncommittedEvent};

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<RequestId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        request_id: &RequestId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .lock()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let stream = streams.entry(request_id.clone()).or_default();
        let current = Self::current_version(stream);

        for uncommitted in &events {
            if let Some(existing) = stream.iter().find(|e| e.id == uncommitted.id) {
                // A duplicate deterministic id within the same stream is an
                // idempotent no-op, not an error: return what's already
                // there so the caller republishes instead of failing.
                return Ok(vec![existing.clone()]);
            }
        }

        match expected_version {
            ExpectedVersion::Exact(expected) if expected != current => {
                return Err(EventStoreError::Concurrency {
                    expected,
                    actual: current,
                });
            }
            _ => {}
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                id: e.id,
                request_id: request_id.clone(),
                version: next,
                event_type: e.event_type,
                occurred_at: e.occurred_at,
                correlation_id: e.correlation_id,
                causation_id: e.causation_id,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    async fn load_stream(&self, request_id: &RequestId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;
        Ok(streams.get(request_id).cloned().unwrap_or_default())
    }

    async fn find_by_id(
        &self,
        request_id: &RequestId,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;
        Ok(streams
            .get(request_id)
            .and_then(|stream| stream.iter().find(|e| e.id == event_id))
            .cloned())
    }
}
