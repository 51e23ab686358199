use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use dialsync_core::domain::format_timestamp;
use dialsync_core::domain::idempotency::{
    CachedResponse, IdempotencyKey, IdempotencyRecord, InsertOutcome,
};
use dialsync_core::domain::TenantId;

use super::{parse_timestamp, IdempotencyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlIdempotencyRepository {
    pool: DbPool,
}

impl SqlIdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyRepository for SqlIdempotencyRepository {
    async fn find(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                tenant_id,
                idempotency_key,
                request_hash,
                status_code,
                content_type,
                response_body,
                created_at,
                expires_at
             FROM idempotency_record
             WHERE tenant_id = ? AND idempotency_key = ?",
        )
        .bind(&tenant.0)
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn insert(&self, record: IdempotencyRecord) -> Result<InsertOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO idempotency_record (
                tenant_id,
                idempotency_key,
                request_hash,
                status_code,
                content_type,
                response_body,
                created_at,
                expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, idempotency_key) DO NOTHING",
        )
        .bind(&record.tenant_id.0)
        .bind(&record.key.0)
        .bind(&record.request_hash)
        .bind(i64::from(record.response.status_code))
        .bind(&record.response.content_type)
        .bind(&record.response.body)
        .bind(format_timestamp(&record.created_at))
        .bind(format_timestamp(&record.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_record
             WHERE tenant_id = ? AND idempotency_key = ? AND expires_at <= ?",
        )
        .bind(&tenant.0)
        .bind(&key.0)
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_record WHERE expires_at <= ?")
            .bind(format_timestamp(&now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn record_from_row(row: SqliteRow) -> Result<IdempotencyRecord, RepositoryError> {
    let status_raw = row.try_get::<i64, _>("status_code")?;
    let status_code = u16::try_from(status_raw).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `status_code`: {status_raw}"))
    })?;

    Ok(IdempotencyRecord {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        key: IdempotencyKey(row.try_get("idempotency_key")?),
        request_hash: row.try_get("request_hash")?,
        response: CachedResponse {
            status_code,
            content_type: row.try_get("content_type")?,
            body: row.try_get("response_body")?,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
    })
}
