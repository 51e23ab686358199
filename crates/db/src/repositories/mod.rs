use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use dialsync_core::domain::call::{
    BatchProgress, CallDetails, CallRecord, CallTransition, TransitionOutcome,
};
use dialsync_core::domain::credit::CreditLedgerEntry;
use dialsync_core::domain::idempotency::{IdempotencyKey, IdempotencyRecord, InsertOutcome};
use dialsync_core::domain::rate_limit::WindowHit;
use dialsync_core::domain::resource::{RemoteId, ResourceId, ResourceKind, SyncedResource};
use dialsync_core::domain::TenantId;

pub mod call;
pub mod idempotency;
pub mod memory;
pub mod rate_limit;
pub mod resource;

pub use call::SqlCallRepository;
pub use idempotency::SqlIdempotencyRepository;
pub use memory::{
    InMemoryCallRepository, InMemoryIdempotencyRepository, InMemoryRateLimitRepository,
    InMemoryResourceRepository,
};
pub use rate_limit::SqlRateLimitRepository;
pub use resource::SqlResourceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Local mirror of provider-side resources, keyed by (tenant, id).
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find(
        &self,
        tenant: &TenantId,
        id: &ResourceId,
    ) -> Result<Option<SyncedResource>, RepositoryError>;

    async fn find_by_remote_id(
        &self,
        tenant: &TenantId,
        remote_id: &RemoteId,
    ) -> Result<Option<SyncedResource>, RepositoryError>;

    /// Non-deleted resource of `kind` whose normalized name matches.
    async fn find_by_name(
        &self,
        tenant: &TenantId,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<SyncedResource>, RepositoryError>;

    /// Every row for the tenant regardless of status, oldest first.
    async fn list(
        &self,
        tenant: &TenantId,
        kind: Option<ResourceKind>,
    ) -> Result<Vec<SyncedResource>, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the id or live name is taken.
    async fn insert(&self, resource: SyncedResource) -> Result<(), RepositoryError>;

    /// Single-row upsert.
    async fn save(&self, resource: SyncedResource) -> Result<(), RepositoryError>;

    async fn remove(&self, tenant: &TenantId, id: &ResourceId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn insert(&self, record: CallRecord) -> Result<(), RepositoryError>;

    async fn find_by_remote_id(
        &self,
        remote_call_id: &RemoteId,
    ) -> Result<Option<CallRecord>, RepositoryError>;

    async fn list(&self, tenant: &TenantId, limit: u32)
        -> Result<Vec<CallRecord>, RepositoryError>;

    /// Applies a forward status change together with its credit debit and
    /// batch counter increment in one atomic step. Non-forward changes leave
    /// everything untouched and report [`TransitionOutcome::Unchanged`].
    async fn transition(
        &self,
        remote_call_id: &RemoteId,
        transition: CallTransition,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// Fills in post-call data; absent fields keep their stored value.
    async fn record_details(
        &self,
        remote_call_id: &RemoteId,
        details: CallDetails,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn batch_progress(
        &self,
        tenant: &TenantId,
        batch_id: &ResourceId,
    ) -> Result<BatchProgress, RepositoryError>;
}

#[async_trait]
pub trait CreditLedgerRepository: Send + Sync {
    async fn list_for_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<CreditLedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn find(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError>;

    /// First writer wins; a later insert for the same (tenant, key) is a no-op.
    async fn insert(&self, record: IdempotencyRecord) -> Result<InsertOutcome, RepositoryError>;

    /// Deletes the record only if it has expired by `now`.
    async fn delete_expired(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Counts one request against `bucket`, starting a fresh window when the
    /// stored one is at least `window_ms` old.
    async fn hit(
        &self,
        bucket: &str,
        now: DateTime<Utc>,
        window_ms: i64,
    ) -> Result<WindowHit, RepositoryError>;

    /// Drops windows that started before `before`.
    async fn purge_stale(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn millis_to_timestamp(column: &str, value: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::<Utc>::from_timestamp_millis(value).ok_or_else(|| {
        RepositoryError::Decode(format!("invalid epoch milliseconds in `{column}`: {value}"))
    })
}
