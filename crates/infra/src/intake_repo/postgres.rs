//! Postgres-backed `IntakeRepository`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use taskbridge_core::TerminalStatus;
use taskbridge_ports::{IntakeError, IntakeRepository, IntakeRow, IntakeStatus};

#[derive(Debug, Clone)]
pub struct PostgresIntakeRepository {
    pool: Arc<PgPool>,
}

impl PostgresIntakeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS intake_rows (
            partition_key TEXT NOT NULL,
            row_key TEXT NOT NULL,
            status TEXT NOT NULL,
            payload JSONB NOT NULL,
            final_status TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            lease_until TIMESTAMPTZ,
            PRIMARY KEY (partition_key, row_key)
        );
        CREATE INDEX IF NOT EXISTS intake_rows_unprocessed_idx
            ON intake_rows (created_at) WHERE status = 'unprocessed';
        CREATE INDEX IF NOT EXISTS intake_rows_claimed_lease_idx
            ON intake_rows (lease_until) WHERE status = 'claimed';
    "#;
}

#[async_trait]
impl IntakeRepository for PostgresIntakeRepository {
    #[instrument(skip(self), fields(limit), err)]
    async fn list_unprocessed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<IntakeRow>, IntakeError> {
        let rows = sqlx::query_as::<_, IntakeRowFields>(
            r#"
            SELECT partition_key, row_key, status, payload, created_at, lease_until
            FROM intake_rows
            WHERE status = 'unprocessed'
               OR (status = 'claimed' AND lease_until <= $2)
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| IntakeError::Backend(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(partition_key, row_key), err)]
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<IntakeRow>, IntakeError> {
        let row = sqlx::query_as::<_, IntakeRowFields>(
            r#"
            SELECT partition_key, row_key, status, payload, created_at, lease_until
            FROM intake_rows
            WHERE partition_key = $1 AND row_key = $2
            "#,
        )
        .bind(partition_key)
        .bind(row_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| IntakeError::Backend(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    /// ETag-conditioned claim: the `WHERE` clause is the compare-and-swap —
    /// it only matches a row that is `unprocessed`, or `claimed` with an
    /// expired `lease_until`, so a losing racer's `UPDATE` affects zero rows
    /// rather than erroring.
    #[instrument(skip(self), fields(partition_key, row_key), err)]
    async fn try_claim(
        &self,
        partition_key: &str,
        row_key: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, IntakeError> {
        let result = sqlx::query(
            r#"
            UPDATE intake_rows SET status = 'claimed', lease_until = $3
            WHERE partition_key = $1 AND row_key = $2
              AND (status = 'unprocessed' OR (status = 'claimed' AND lease_until <= $4))
            "#,
        )
        .bind(partition_key)
        .bind(row_key)
        .bind(lease_until)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| IntakeError::Backend(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(partition_key, row_key), err)]
    async fn mark_terminal(
        &self,
        partition_key: &str,
        row_key: &str,
        final_status: TerminalStatus,
    ) -> Result<(), IntakeError> {
        sqlx::query(
            r#"
            INSERT INTO intake_rows (partition_key, row_key, status, payload, final_status, created_at, lease_until)
            VALUES ($1, $2, 'completed', '{}'::jsonb, $3, now(), NULL)
            ON CONFLICT (partition_key, row_key) DO UPDATE SET
                status = 'completed',
                final_status = EXCLUDED.final_status,
                lease_until = NULL
            "#,
        )
        .bind(partition_key)
        .bind(row_key)
        .bind(final_status_tag(final_status))
        .execute(&*self.pool)
        .await
        .map_err(|e| IntakeError::Backend(e.to_string()))?;

        Ok(())
    }
}

fn parse_status_tag(tag: &str) -> Result<IntakeStatus, IntakeError> {
    match tag {
        "unprocessed" => Ok(IntakeStatus::Unprocessed),
        "claimed" => Ok(IntakeStatus::Claimed),
        "completed" => Ok(IntakeStatus::Completed),
        other => Err(IntakeError::Backend(format!("unrecognized intake status {other:?}"))),
    }
}

fn final_status_tag(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Pass => "pass",
        TerminalStatus::Fail => "fail",
    }
}

#[derive(Debug, FromRow)]
struct IntakeRowFields {
    partition_key: String,
    row_key: String,
    status: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    lease_until: Option<DateTime<Utc>>,
}

impl TryFrom<IntakeRowFields> for IntakeRow {
    type Error = IntakeError;

    fn try_from(fields: IntakeRowFields) -> Result<Self, Self::Error> {
        Ok(IntakeRow {
            partition_key: fields.partition_key,
            row_key: fields.row_key,
            status: parse_status_tag(&fields.status)?,
            payload: fields.payload,
            created_at: fields.created_at,
            lease_until: fields.lease_until,
        })
    }
}
