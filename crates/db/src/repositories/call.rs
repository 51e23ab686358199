use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use dialsync_core::domain::call::{
    BatchProgress, CallDetails, CallId, CallRecord, CallStatus, CallTransition, TransitionOutcome,
};
use dialsync_core::domain::credit::CreditLedgerEntry;
use dialsync_core::domain::format_timestamp;
use dialsync_core::domain::resource::{RemoteId, ResourceId};
use dialsync_core::domain::TenantId;

use super::{
    is_unique_violation, parse_decimal, parse_optional_timestamp, parse_timestamp, parse_u32,
    CallRepository, CreditLedgerRepository, RepositoryError,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
    id,
    tenant_id,
    remote_call_id,
    agent_id,
    batch_id,
    to_number,
    status,
    started_at,
    ended_at,
    duration_secs,
    failure_reason,
    transcript,
    analysis_json,
    created_at,
    updated_at
 FROM call_record";

pub struct SqlCallRepository {
    pool: DbPool,
}

impl SqlCallRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CallRepository for SqlCallRepository {
    async fn insert(&self, record: CallRecord) -> Result<(), RepositoryError> {
        let analysis_json = encode_analysis(&record)?;
        let result = sqlx::query(
            "INSERT INTO call_record (
                id,
                tenant_id,
                remote_call_id,
                agent_id,
                batch_id,
                to_number,
                status,
                started_at,
                ended_at,
                duration_secs,
                failure_reason,
                transcript,
                analysis_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.tenant_id.0)
        .bind(&record.remote_call_id.0)
        .bind(&record.agent_id.0)
        .bind(record.batch_id.as_ref().map(|id| id.0.clone()))
        .bind(&record.to_number)
        .bind(record.status.as_str())
        .bind(record.started_at.as_ref().map(format_timestamp))
        .bind(record.ended_at.as_ref().map(format_timestamp))
        .bind(record.duration_secs.map(i64::from))
        .bind(&record.failure_reason)
        .bind(&record.transcript)
        .bind(analysis_json)
        .bind(format_timestamp(&record.created_at))
        .bind(format_timestamp(&record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict(format!(
                "call `{}` is already recorded",
                record.remote_call_id
            ))),
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_remote_id(
        &self,
        remote_call_id: &RemoteId,
    ) -> Result<Option<CallRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE remote_call_id = ?"))
            .bind(&remote_call_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(call_from_row).transpose()
    }

    async fn list(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> Result<Vec<CallRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ? ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(&tenant.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(call_from_row).collect()
    }

    async fn transition(
        &self,
        remote_call_id: &RemoteId,
        transition: CallTransition,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE remote_call_id = ?"))
            .bind(&remote_call_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = row.map(call_from_row).transpose()? else {
            tx.rollback().await?;
            return Ok(TransitionOutcome::NotFound);
        };

        if !current.status.can_transition_to(transition.to) {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Unchanged { current });
        }

        let next = current.advanced(&transition);
        let updated = sqlx::query(
            "UPDATE call_record SET
                status = ?,
                started_at = ?,
                ended_at = ?,
                duration_secs = ?,
                failure_reason = ?,
                updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(next.status.as_str())
        .bind(next.started_at.as_ref().map(format_timestamp))
        .bind(next.ended_at.as_ref().map(format_timestamp))
        .bind(next.duration_secs.map(i64::from))
        .bind(&next.failure_reason)
        .bind(format_timestamp(&next.updated_at))
        .bind(&current.id.0)
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Unchanged { current });
        }

        if let Some(debit) = &transition.debit {
            sqlx::query(
                "INSERT INTO credit_ledger (id, tenant_id, call_id, amount, reason, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(call_id, reason) DO NOTHING",
            )
            .bind(format!("cr_{}", uuid::Uuid::new_v4().simple()))
            .bind(&current.tenant_id.0)
            .bind(&current.id.0)
            .bind(debit.amount.to_string())
            .bind(&debit.reason)
            .bind(format_timestamp(&transition.at))
            .execute(&mut *tx)
            .await?;
        }

        if let (true, Some(batch_id)) = (next.status.is_terminal(), &current.batch_id) {
            let (completed, failed) = match next.status {
                CallStatus::Completed => (1_i64, 0_i64),
                _ => (0, 1),
            };
            sqlx::query(
                "INSERT INTO batch_progress (tenant_id, batch_id, completed_calls, failed_calls, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(tenant_id, batch_id) DO UPDATE SET
                    completed_calls = batch_progress.completed_calls + excluded.completed_calls,
                    failed_calls = batch_progress.failed_calls + excluded.failed_calls,
                    updated_at = excluded.updated_at",
            )
            .bind(&current.tenant_id.0)
            .bind(&batch_id.0)
            .bind(completed)
            .bind(failed)
            .bind(format_timestamp(&transition.at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(TransitionOutcome::Applied { previous: current.status, record: next })
    }

    async fn record_details(
        &self,
        remote_call_id: &RemoteId,
        details: CallDetails,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let analysis_json = details
            .analysis
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("cannot encode analysis: {error}")))?;

        let result = sqlx::query(
            "UPDATE call_record SET
                transcript = COALESCE(?, transcript),
                analysis_json = COALESCE(?, analysis_json),
                updated_at = ?
             WHERE remote_call_id = ?",
        )
        .bind(details.transcript)
        .bind(analysis_json)
        .bind(format_timestamp(&at))
        .bind(&remote_call_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn batch_progress(
        &self,
        tenant: &TenantId,
        batch_id: &ResourceId,
    ) -> Result<BatchProgress, RepositoryError> {
        let row = sqlx::query(
            "SELECT completed_calls, failed_calls
             FROM batch_progress
             WHERE tenant_id = ? AND batch_id = ?",
        )
        .bind(&tenant.0)
        .bind(&batch_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(BatchProgress::default());
        };
        Ok(BatchProgress {
            completed_calls: parse_u32("completed_calls", row.try_get("completed_calls")?)?,
            failed_calls: parse_u32("failed_calls", row.try_get("failed_calls")?)?,
        })
    }
}

#[async_trait::async_trait]
impl CreditLedgerRepository for SqlCallRepository {
    async fn list_for_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<CreditLedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, call_id, amount, reason, created_at
             FROM credit_ledger
             WHERE tenant_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ledger_entry_from_row).collect()
    }
}

fn encode_analysis(record: &CallRecord) -> Result<Option<String>, RepositoryError> {
    record
        .analysis
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("cannot encode analysis: {error}")))
}

fn call_from_row(row: SqliteRow) -> Result<CallRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CallStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown call status `{status_raw}`")))?;

    let analysis = row
        .try_get::<Option<String>, _>("analysis_json")?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("invalid analysis_json: {error}")))?;

    let duration_secs = row
        .try_get::<Option<i64>, _>("duration_secs")?
        .map(|value| parse_u32("duration_secs", value))
        .transpose()?;

    Ok(CallRecord {
        id: CallId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        remote_call_id: RemoteId(row.try_get("remote_call_id")?),
        agent_id: ResourceId(row.try_get("agent_id")?),
        batch_id: row.try_get::<Option<String>, _>("batch_id")?.map(ResourceId),
        to_number: row.try_get("to_number")?,
        status,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at")?)?,
        duration_secs,
        failure_reason: row.try_get("failure_reason")?,
        transcript: row.try_get("transcript")?,
        analysis,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn ledger_entry_from_row(row: SqliteRow) -> Result<CreditLedgerEntry, RepositoryError> {
    Ok(CreditLedgerEntry {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        call_id: CallId(row.try_get("call_id")?),
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        reason: row.try_get("reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
