//! The `IntakeRepository` port: the external row source Discover scans
//! for the row claiming and completion queries Discover and Complete need.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use taskbridge_core::{RequestId, TerminalStatus};

/// Status owned by the intake store itself, independent of the aggregate's
/// `WorkItemStatus` — a row can sit `Unprocessed` indefinitely before
/// Discover ever claims it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    Unprocessed,
    Claimed,
    Completed,
}

/// A single row as it exists in the intake source, prior to any workflow
/// event being written for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeRow {
    pub partition_key: String,
    pub row_key: String,
    pub status: IntakeStatus,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    /// Set when `status == Claimed`; a row is eligible for (re-)claim once
    /// this has passed, even without ever having been marked `Completed`.
    pub lease_until: Option<DateTime<Utc>>,
}

impl IntakeRow {
    pub fn request_id(&self) -> Result<RequestId, taskbridge_core::DomainError> {
        RequestId::new(self.partition_key.clone(), self.row_key.clone())
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Source of unprocessed work. Discover scans rows eligible for claim —
/// `Unprocessed`, or `Claimed` with an expired `lease_until` — in a stable
/// order, and conditionally claims each with `try_claim`. The conditional
/// update (status + lease check, applied atomically by the backing store)
/// is the exclusivity guarantee on the intake side; the event store's
/// `expectedVersion=0` append is the exclusivity guarantee on the stream
/// side, so a `try_claim` race still produces only one
/// `request.discovered.v1`.
#[async_trait]
pub trait IntakeRepository: Send + Sync {
    /// List up to `limit` rows eligible for claim as of `now` — status
    /// `Unprocessed`, or `Claimed` with `lease_until <= now` — oldest
    /// `created_at` first.
    async fn list_unprocessed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<IntakeRow>, IntakeError>;

    /// Look up a single row by its keys. Used by `taskbridge-service`'s
    /// dispatch loop to recover the originating payload for `SubmitJob`,
    /// since that payload is not itself carried on any stored event
    /// (`submission.prepared.v1` only carries the attempt number).
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<IntakeRow>, IntakeError>;

    /// Conditionally claim a row: succeeds only if the row is currently
    /// `Unprocessed`, or `Claimed` with an expired `lease_until`. On success
    /// the row becomes `Claimed` with `lease_until = lease_until`. Returns
    /// `false` (not an error) when another worker's claim already won the
    /// race or already holds an unexpired lease.
    async fn try_claim(
        &self,
        partition_key: &str,
        row_key: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, IntakeError>;

    /// Write the row's final status, unconditionally ("force" — safe to
    /// call more than once for the same row with the same status).
    async fn mark_terminal(
        &self,
        partition_key: &str,
        row_key: &str,
        final_status: TerminalStatus,
    ) -> Result<(), IntakeError>;
}

#[async_trait]
impl<S> IntakeRepository for std::sync::Arc<S>
where
    S: IntakeRepository + ?Sized,
{
    async fn list_unprocessed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<IntakeRow>, IntakeError> {
        (**self).list_unprocessed(limit, now).await
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<IntakeRow>, IntakeError> {
        (**self).get(partition_key, row_key).await
    }

    async fn try_claim(
        &self,
        partition_key: &str,
        row_key: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, IntakeError> {
        (**self).try_claim(partition_key, row_key, now, lease_until).await
    }

    async fn mark_terminal(
        &self,
        partition_key: &str,
        row_key: &str,
        final_status: TerminalStatus,
    ) -> Result<(), IntakeError> {
        (**self).mark_terminal(partition_key, row_key, final_status).await
    }
}
