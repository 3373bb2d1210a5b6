use crate::error::{AppError, Result};
use crate::idempotency::record::{IdempotencyRecord, IdempotencyStatus};
use crate::idempotency::store::{ensure_terminal_target, CreateOutcome, IdempotencyStore};
use async_trait::async_trait;
use sqlx::PgPool;

const RECORD_COLUMNS: &str = "id, user_id, endpoint, request_hash, status, response_data, created_at, expires_at, sequence_number, table_name, random_suffix";

/// PostgreSQL-backed idempotency store.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes a specific record by key.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn existing_outcome(&self, id: &str) -> Result<Option<CreateOutcome>> {
        Ok(self.get(id).await?.map(CreateOutcome::AlreadyExists))
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn create(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        // The conflicting row can be swept between the insert and the read
        // back, in which case the insert is simply attempted again.
        for _ in 0..2 {
            let inserted: Option<(String,)> = sqlx::query_as(
                r#"
                INSERT INTO idempotency_keys (id, user_id, endpoint, request_hash, status, response_data, created_at, expires_at, sequence_number, table_name, random_suffix)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.endpoint)
            .bind(&record.request_hash)
            .bind(record.status)
            .bind(&record.response_data)
            .bind(record.created_at)
            .bind(record.expires_at)
            .bind(record.sequence_number)
            .bind(&record.table_name)
            .bind(&record.random_suffix)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;

            if inserted.is_some() {
                return Ok(CreateOutcome::Created);
            }
            if let Some(outcome) = self.existing_outcome(&record.id).await? {
                return Ok(outcome);
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "Idempotency key {} kept colliding with a vanishing record",
            record.id
        )))
    }

    async fn reclaim_failed(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        let replaced: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_keys (id, user_id, endpoint, request_hash, status, response_data, created_at, expires_at, sequence_number, table_name, random_suffix)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                endpoint = EXCLUDED.endpoint,
                request_hash = EXCLUDED.request_hash,
                status = EXCLUDED.status,
                response_data = EXCLUDED.response_data,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at,
                sequence_number = EXCLUDED.sequence_number,
                table_name = EXCLUDED.table_name,
                random_suffix = EXCLUDED.random_suffix
            WHERE idempotency_keys.status = 'FAILED'
            RETURNING id
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.endpoint)
        .bind(&record.request_hash)
        .bind(record.status)
        .bind(&record.response_data)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.sequence_number)
        .bind(&record.table_name)
        .bind(&record.random_suffix)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        if replaced.is_some() {
            return Ok(CreateOutcome::Created);
        }

        match self.existing_outcome(&record.id).await? {
            Some(outcome) => Ok(outcome),
            None => self.create(record).await,
        }
    }

    async fn get(&self, id: &str) -> Result<Option<IdempotencyRecord>> {
        let query = format!("SELECT {} FROM idempotency_keys WHERE id = $1", RECORD_COLUMNS);
        let record = sqlx::query_as::<_, IdempotencyRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn update_status(
        &self,
        id: &str,
        status: IdempotencyStatus,
        response_data: Option<Vec<u8>>,
    ) -> Result<IdempotencyRecord> {
        ensure_terminal_target(id, status)?;

        let response_data = match status {
            IdempotencyStatus::Completed => response_data,
            _ => None,
        };

        let query = format!(
            r#"
            UPDATE idempotency_keys
            SET status = $2, response_data = $3
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let updated = sqlx::query_as::<_, IdempotencyRecord>(&query)
            .bind(id)
            .bind(status)
            .bind(response_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;

        if let Some(record) = updated {
            return Ok(record);
        }

        match self.get(id).await? {
            Some(existing) => Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: existing.status,
                to: status,
            }),
            None => Err(AppError::NotFound(format!("Idempotency key {} not found", id))),
        }
    }

    async fn check_duplicate(
        &self,
        user_id: &str,
        endpoint: &str,
        request_hash: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let query = format!(
            r#"
            SELECT {}
            FROM idempotency_keys
            WHERE user_id = $1 AND endpoint = $2 AND request_hash = $3
            ORDER BY created_at DESC, sequence_number DESC
            LIMIT 1
            "#,
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, IdempotencyRecord>(&query)
            .bind(user_id)
            .bind(endpoint)
            .bind(request_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn next_sequence_number(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT nextval('idempotency_key_sequence')")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row.0)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
