//! The `ProjectionRepository` port: persistence for `RequestProjection`
//! read models.

use async_trait::async_trait;
use thiserror::Error;

use taskbridge_core::RequestId;
use taskbridge_projection::RequestProjection;

#[derive(Debug, Error)]
pub enum ProjectionRepoError {
    #[error("projection for {0} is at version {found}, caller expected at least {expected}")]
    StaleWrite {
        0: RequestId,
        expected: u64,
        found: u64,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Stores one `RequestProjection` row per `RequestId`, keyed for lookup by
/// status (Discover's backlog scan) and by due poll time (ScheduleDuePolls'
/// scan).
#[async_trait]
pub trait ProjectionRepository: Send + Sync {
    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>, ProjectionRepoError>;

    /// Upsert the projection. Implementations must reject (or ignore) a
    /// write whose `last_version` does not strictly increase over the
    /// stored row's, mirroring the monotonic-version guard in
    /// `taskbridge_events::ProjectionRunner`.
    async fn upsert(&self, projection: RequestProjection) -> Result<(), ProjectionRepoError>;

    /// Requests currently due for an external-job poll: `in_progress` with a
    /// `next_poll_at` at or before `as_of`.
    async fn due_for_poll(
        &self,
        as_of: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<RequestProjection>, ProjectionRepoError>;
}

#[async_trait]
impl<S> ProjectionRepository for std::sync::Arc<S>
where
    S: ProjectionRepository + ?Sized,
{
    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>, ProjectionRepoError> {
        (**self).get(request_id).await
    }

    async fn upsert(&self, projection: RequestProjection) -> Result<(), ProjectionRepoError> {
        (**self).upsert(projection).await
    }

    async fn due_for_poll(
        &self,
        as_of: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<RequestProjection>, ProjectionRepoError> {
        (**self).due_for_poll(as_of, limit).await
    }
}
