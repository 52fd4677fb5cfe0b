//! In-memory `IdempotencyStore`: a `Mutex<HashMap>` keyed by `(handlerName,
//! eventId)`, enforcing the same lease/takeover rules the Postgres adapter
//! enforces with a conditional `UPDATE`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskbridge_ports::{IdempotencyError, IdempotencyRecord, IdempotencyStore};

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    leases: Mutex<HashMap<(String, String), IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_acquire(
        &self,
        handler_name: &str,
        event_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| IdempotencyError::Backend("lock poisoned".to_string()))?;
        let key = (handler_name.to_string(), event_id.to_string());

        if let Some(existing) = leases.get(&key) {
            if existing.completed {
                return Ok(existing.clone());
            }
            if existing.expires_at > now {
                return Err(IdempotencyError::AlreadyLeased {
                    handler_name: handler_name.to_string(),
                    event_id: event_id.to_string(),
                });
            }
        }

        let record = IdempotencyRecord {
            handler_name: handler_name.to_string(),
            event_id: event_id.to_string(),
            leased_at: now,
            expires_at: now + lease_duration,
            completed: false,
        };
        leases.insert(key, record.clone());
        Ok(record)
    }

    async fn complete(&self, handler_name: &str, event_id: &str) -> Result<(), IdempotencyError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| IdempotencyError::Backend("lock poisoned".to_string()))?;
        let key = (handler_name.to_string(), event_id.to_string());
        let entry = leases.entry(key).or_insert_with(|| IdempotencyRecord {
            handler_name: handler_name.to_string(),
            event_id: event_id.to_string(),
            leased_at: Utc::now(),
            expires_at: Utc::now(),
            completed: false,
        });
        entry.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_before_expiry_is_rejected() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), now)
            .await
            .unwrap();

        let err = store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), now)
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::AlreadyLeased { .. }));
    }

    #[tokio::test]
    async fn expired_lease_is_eligible_for_takeover() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(31);
        let record = store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), later)
            .await
            .unwrap();
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn completed_lease_is_never_retaken() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), now)
            .await
            .unwrap();
        store.complete("discover", "evt-1").await.unwrap();

        let much_later = now + chrono::Duration::days(1);
        let record = store
            .try_acquire("discover", "evt-1", chrono::Duration::seconds(30), much_later)
            .await
            .unwrap();
        assert!(record.completed);
    }
}
