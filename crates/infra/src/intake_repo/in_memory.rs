//! In-memory `IntakeRepository`: a `Mutex<HashMap>` seeded directly by tests
//! and the dev `taskbridge-service` binary. `try_claim` conditionally
//! updates status + lease under the mutex, mirroring the row-level
//! compare-and-swap the Postgres adapter does with a `WHERE` clause.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use taskbridge_core::TerminalStatus;
use taskbridge_ports::{IntakeError, IntakeRepository, IntakeRow, IntakeStatus};

#[derive(Debug, Default)]
pub struct InMemoryIntakeRepository {
    rows: Mutex<HashMap<(String, String), (IntakeRow, Option<TerminalStatus>)>>,
}

impl InMemoryIntakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row — used by tests and by `taskbridge-service`'s dev mode to
    /// simulate rows arriving in the intake source.
    pub fn seed(&self, partition_key: impl Into<String>, row_key: impl Into<String>, payload: JsonValue) {
        let partition_key = partition_key.into();
        let row_key = row_key.into();
        let row = IntakeRow {
            partition_key: partition_key.clone(),
            row_key: row_key.clone(),
            status: IntakeStatus::Unprocessed,
            payload,
            created_at: Utc::now(),
            lease_until: None,
        };
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert((partition_key, row_key), (row, None));
    }

    /// Read back a row's current status — used by tests asserting on the
    /// intake side-effect of `CompleteRequest`.
    pub fn status_of(&self, partition_key: &str, row_key: &str) -> Option<IntakeStatus> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .get(&(partition_key.to_string(), row_key.to_string()))
            .map(|(row, _)| row.status)
    }

    /// Read back the final status written by `mark_terminal`, if any.
    pub fn final_status_of(&self, partition_key: &str, row_key: &str) -> Option<TerminalStatus> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .get(&(partition_key.to_string(), row_key.to_string()))
            .and_then(|(_, final_status)| *final_status)
    }
}

#[async_trait]
impl IntakeRepository for InMemoryIntakeRepository {
    async fn list_unprocessed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<IntakeRow>, IntakeError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| IntakeError::Backend("lock poisoned".to_string()))?;

        let mut unprocessed: Vec<IntakeRow> = rows
            .values()
            .filter(|(row, _)| is_claimable(row, now))
            .map(|(row, _)| row.clone())
            .collect();
        unprocessed.sort_by_key(|row| row.created_at);
        unprocessed.truncate(limit);
        Ok(unprocessed)
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<IntakeRow>, IntakeError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| IntakeError::Backend("lock poisoned".to_string()))?;
        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .map(|(row, _)| row.clone()))
    }

    async fn try_claim(
        &self,
        partition_key: &str,
        row_key: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, IntakeError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| IntakeError::Backend("lock poisoned".to_string()))?;
        match rows.get_mut(&(partition_key.to_string(), row_key.to_string())) {
            Some((row, _)) if is_claimable(row, now) => {
                row.status = IntakeStatus::Claimed;
                row.lease_until = Some(lease_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_terminal(
        &self,
        partition_key: &str,
        row_key: &str,
        final_status: TerminalStatus,
    ) -> Result<(), IntakeError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| IntakeError::Backend("lock poisoned".to_string()))?;
        let key = (partition_key.to_string(), row_key.to_string());
        let entry = rows.entry(key).or_insert_with(|| {
            (
                IntakeRow {
                    partition_key: partition_key.to_string(),
                    row_key: row_key.to_string(),
                    status: IntakeStatus::Unprocessed,
                    payload: JsonValue::Null,
                    created_at: Utc::now(),
                    lease_until: None,
                },
                None,
            )
        });
        entry.0.status = IntakeStatus::Completed;
        entry.0.lease_until = None;
        entry.1 = Some(final_status);
        Ok(())
    }
}

/// A row is eligible for `try_claim` when it is `Unprocessed`, or `Claimed`
/// with a `lease_until` that has already passed.
fn is_claimable(row: &IntakeRow, now: DateTime<Utc>) -> bool {
    match row.status {
        IntakeStatus::Unprocessed => true,
        IntakeStatus::Claimed => row.lease_until.map(|until| until <= now).unwrap_or(true),
        IntakeStatus::Completed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn list_unprocessed_excludes_claimed_rows_with_live_lease() {
        let repo = InMemoryIntakeRepository::new();
        repo.seed("p1", "r1", json!({}));
        repo.seed("p1", "r2", json!({}));
        let now = Utc::now();
        repo.try_claim("p1", "r1", now, now + chrono::Duration::seconds(1800))
            .await
            .unwrap();

        let rows = repo.list_unprocessed(10, now).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_key, "r2");
    }

    #[tokio::test]
    async fn try_claim_fails_while_lease_is_live() {
        let repo = InMemoryIntakeRepository::new();
        repo.seed("p1", "r1", json!({}));
        let now = Utc::now();
        let lease_until = now + chrono::Duration::seconds(1800);
        assert!(repo.try_claim("p1", "r1", now, lease_until).await.unwrap());
        assert!(!repo
            .try_claim("p1", "r1", now, lease_until)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn try_claim_succeeds_again_once_the_lease_has_expired() {
        let repo = InMemoryIntakeRepository::new();
        repo.seed("p1", "r1", json!({}));
        let claimed_at = Utc::now();
        let short_lease = claimed_at + chrono::Duration::seconds(1);
        assert!(repo
            .try_claim("p1", "r1", claimed_at, short_lease)
            .await
            .unwrap());

        let after_expiry = short_lease + chrono::Duration::seconds(1);
        let rows = repo.list_unprocessed(10, after_expiry).await.unwrap();
        assert_eq!(rows.len(), 1, "expired-lease row must be re-listed");

        let new_lease = after_expiry + chrono::Duration::seconds(1800);
        assert!(repo
            .try_claim("p1", "r1", after_expiry, new_lease)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn mark_terminal_is_idempotent() {
        let repo = InMemoryIntakeRepository::new();
        repo.seed("p1", "r1", json!({}));
        repo.mark_terminal("p1", "r1", TerminalStatus::Pass).await.unwrap();
        repo.mark_terminal("p1", "r1", TerminalStatus::Pass).await.unwrap();
        assert_eq!(repo.status_of("p1", "r1"), Some(IntakeStatus::Completed));
        assert_eq!(repo.final_status_of("p1", "r1"), Some(TerminalStatus::Pass));
    }
}
