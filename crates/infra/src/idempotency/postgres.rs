//! Postgres-backed `IdempotencyStore`.
//!
//! `try_acquire` is a single `INSERT ... ON CONFLICT DO UPDATE` guarded by a
//! `WHERE` clause so the acquire-or-reject decision is made atomically by
//! the database rather than by a read-then-write race in this process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use taskbridge_ports::{IdempotencyError, IdempotencyRecord, IdempotencyStore};

#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: Arc<PgPool>,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS idempotency_leases (
            handler_name TEXT NOT NULL,
            event_id TEXT NOT NULL,
            leased_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            completed BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (handler_name, event_id)
        );
    "#;
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self), fields(handler_name, event_id), err)]
    async fn try_acquire(
        &self,
        handler_name: &str,
        event_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let expires_at = now + lease_duration;

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            INSERT INTO idempotency_leases (handler_name, event_id, leased_at, expires_at, completed)
            VALUES ($1, $2, $3, $4, FALSE)
            ON CONFLICT (handler_name, event_id) DO UPDATE SET
                leased_at = EXCLUDED.leased_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_leases.completed = TRUE OR idempotency_leases.expires_at <= $5
            RETURNING handler_name, event_id, leased_at, expires_at, completed
            "#,
        )
        .bind(handler_name)
        .bind(event_id)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| IdempotencyError::Backend(e.to_string()))?;

        match row {
            Some(row) => Ok(row.into_record()),
            None => {
                // The INSERT's WHERE guard rejected the write: a live,
                // uncompleted lease is already held by someone else. Read it
                // back only to report which pair is contended.
                Err(IdempotencyError::AlreadyLeased {
                    handler_name: handler_name.to_string(),
                    event_id: event_id.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self), fields(handler_name, event_id), err)]
    async fn complete(&self, handler_name: &str, event_id: &str) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_leases (handler_name, event_id, leased_at, expires_at, completed)
            VALUES ($1, $2, now(), now(), TRUE)
            ON CONFLICT (handler_name, event_id) DO UPDATE SET completed = TRUE
            "#,
        )
        .bind(handler_name)
        .bind(event_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| IdempotencyError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct LeaseRow {
    handler_name: String,
    event_id: String,
    leased_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    completed: bool,
}

impl LeaseRow {
    fn into_record(self) -> IdempotencyRecord {
        IdempotencyRecord {
            handler_name: self.handler_name,
            event_id: self.event_id,
            leased_at: self.leased_at,
            expires_at: self.expires_at,
            completed: self.completed,
        }
    }
}
