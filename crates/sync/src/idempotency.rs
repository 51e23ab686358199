use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use dialsync_core::config::IdempotencyConfig;
use dialsync_core::domain::idempotency::{
    CachedResponse, IdempotencyKey, IdempotencyRecord, InsertOutcome,
};
use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_db::IdempotencyRepository;

use crate::repository_error;

/// Replays the stored outcome of a mutating request for the same tenant, key
/// and request fingerprint.
pub struct IdempotencyCache {
    records: Arc<dyn IdempotencyRepository>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(records: Arc<dyn IdempotencyRepository>, ttl_days: u32) -> Self {
        Self { records, ttl: Duration::days(i64::from(ttl_days.max(1))) }
    }

    pub fn from_config(records: Arc<dyn IdempotencyRepository>, config: &IdempotencyConfig) -> Self {
        Self::new(records, config.ttl_days)
    }

    /// A record stored under the same key for a different request is a miss.
    pub async fn check(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResponse>, ApplicationError> {
        let Some(record) = self.records.find(tenant, key).await.map_err(repository_error)? else {
            return Ok(None);
        };

        if record.is_expired(now) {
            self.records.delete_expired(tenant, key, now).await.map_err(repository_error)?;
            debug!(
                event_name = "idempotency.check.expired",
                tenant_id = %tenant,
                idempotency_key = %key.0,
                "expired record evicted"
            );
            return Ok(None);
        }

        if record.request_hash != request_hash {
            info!(
                event_name = "idempotency.check.hash_mismatch",
                tenant_id = %tenant,
                idempotency_key = %key.0,
                "key reused for a different request; executing normally"
            );
            return Ok(None);
        }

        Ok(Some(record.response))
    }

    /// Losing a concurrent race is not an error: the first stored response stays.
    pub async fn store(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        request_hash: &str,
        response: CachedResponse,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, ApplicationError> {
        let outcome = self
            .records
            .insert(IdempotencyRecord {
                tenant_id: tenant.clone(),
                key: key.clone(),
                request_hash: request_hash.to_string(),
                response,
                created_at: now,
                expires_at: now + self.ttl,
            })
            .await
            .map_err(repository_error)?;

        if outcome == InsertOutcome::AlreadyExists {
            debug!(
                event_name = "idempotency.store.already_exists",
                tenant_id = %tenant,
                idempotency_key = %key.0,
                "another request stored this key first"
            );
        }
        Ok(outcome)
    }

    /// Server errors and throttling are transient; retrying them must re-execute.
    pub fn is_cacheable(status_code: u16) -> bool {
        status_code < 500 && status_code != 429
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use dialsync_core::domain::idempotency::{CachedResponse, IdempotencyKey, InsertOutcome};
    use dialsync_core::domain::TenantId;
    use dialsync_db::repositories::InMemoryIdempotencyRepository;

    use super::IdempotencyCache;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").expect("ts").with_timezone(&Utc)
    }

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            status_code: 201,
            content_type: Some("application/json".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn hit_requires_matching_hash_and_live_record() {
        let cache = IdempotencyCache::new(Arc::new(InMemoryIdempotencyRepository::default()), 1);
        let tenant = TenantId("tenant-a".to_string());
        let key = IdempotencyKey("k1".to_string());

        assert_eq!(cache.check(&tenant, &key, "h1", now()).await.expect("miss"), None);
        assert_eq!(
            cache.store(&tenant, &key, "h1", response("first"), now()).await.expect("store"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            cache.store(&tenant, &key, "h1", response("second"), now()).await.expect("race"),
            InsertOutcome::AlreadyExists
        );

        let hit = cache
            .check(&tenant, &key, "h1", now() + Duration::hours(1))
            .await
            .expect("check");
        assert_eq!(hit, Some(response("first")));

        let other_body = cache.check(&tenant, &key, "h2", now()).await.expect("check");
        assert_eq!(other_body, None);

        let other_tenant =
            cache.check(&TenantId("tenant-b".to_string()), &key, "h1", now()).await.expect("check");
        assert_eq!(other_tenant, None);

        let expired = cache
            .check(&tenant, &key, "h1", now() + Duration::days(1))
            .await
            .expect("check");
        assert_eq!(expired, None);
        assert_eq!(
            cache.store(&tenant, &key, "h1", response("fresh"), now() + Duration::days(1))
                .await
                .expect("store after eviction"),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn transient_failures_are_not_cached() {
        assert!(IdempotencyCache::is_cacheable(201));
        assert!(IdempotencyCache::is_cacheable(409));
        assert!(!IdempotencyCache::is_cacheable(429));
        assert!(!IdempotencyCache::is_cacheable(502));
    }
}
