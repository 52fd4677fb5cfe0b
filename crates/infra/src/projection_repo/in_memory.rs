//! In-memory `ProjectionRepository`: a `Mutex<HashMap>` keyed by `RequestId`,
//! enforcing the same monotonic-version guard the Postgres adapter enforces
//! with a `WHERE` clause on upsert.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskbridge_core::RequestId;
use taskbridge_ports::{ProjectionRepoError, ProjectionRepository};
use taskbridge_projection::RequestProjection;

#[derive(Debug, Default)]
pub struct InMemoryProjectionRepository {
    rows: Mutex<HashMap<RequestId, RequestProjection>>,
}

impl InMemoryProjectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionRepository for InMemoryProjectionRepository {
    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>, ProjectionRepoError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| ProjectionRepoError::Backend("lock poisoned".to_string()))?;
        Ok(rows.get(request_id).cloned())
    }

    async fn upsert(&self, projection: RequestProjection) -> Result<(), ProjectionRepoError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| ProjectionRepoError::Backend("lock poisoned".to_string()))?;

        match rows.get(&projection.request_id) {
            Some(existing) if existing.last_applied_event_version >= projection.last_applied_event_version => {
                // Stale write: silently ignored, not an error — the
                // reducer's monotonic guard protects against a handler
                // re-running and clobbering newer state.
            }
            _ => {
                rows.insert(projection.request_id.clone(), projection);
            }
        }
        Ok(())
    }

    async fn due_for_poll(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RequestProjection>, ProjectionRepoError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| ProjectionRepoError::Backend("lock poisoned".to_string()))?;

        let mut due: Vec<RequestProjection> = rows
            .values()
            .filter(|p| p.is_due_for_poll(as_of))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.next_poll_at);
        due.truncate(limit);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbridge_core::WorkItemStatus;

    fn projection(request_id: RequestId, version: u64) -> RequestProjection {
        RequestProjection {
            partition_key: request_id.partition_key().to_string(),
            row_key: request_id.row_key().to_string(),
            request_id,
            status: WorkItemStatus::InProgress,
            submit_attempt_count: 0,
            next_poll_at: None,
            external_job_id: None,
            last_applied_event_version: version,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stale_upsert_does_not_clobber_newer_row() {
        let repo = InMemoryProjectionRepository::new();
        let id = RequestId::new("p1", "r1").unwrap();
        repo.upsert(projection(id.clone(), 5)).await.unwrap();
        repo.upsert(projection(id.clone(), 3)).await.unwrap();

        let stored = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.last_applied_event_version, 5);
    }

    #[tokio::test]
    async fn due_for_poll_filters_on_status_and_next_poll_at() {
        let repo = InMemoryProjectionRepository::new();
        let now = Utc::now();

        let id1 = RequestId::new("p1", "r1").unwrap();
        let mut due = projection(id1.clone(), 1);
        due.next_poll_at = Some(now - chrono::Duration::seconds(1));
        repo.upsert(due).await.unwrap();

        let id2 = RequestId::new("p2", "r2").unwrap();
        let mut not_yet = projection(id2, 1);
        not_yet.next_poll_at = Some(now + chrono::Duration::seconds(60));
        repo.upsert(not_yet).await.unwrap();

        let results = repo.due_for_poll(now, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].request_id, id1);
    }
}
