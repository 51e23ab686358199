use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use dialsync_core::domain::rate_limit::WINDOW_SECS;
use dialsync_core::errors::ApplicationError;
use dialsync_db::{IdempotencyRepository, RateLimitRepository};

use crate::repository_error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub expired_idempotency_records: u64,
    pub stale_rate_windows: u64,
}

/// Purges rows the request path would otherwise only evict lazily.
pub struct MaintenanceSweep {
    idempotency: Arc<dyn IdempotencyRepository>,
    windows: Arc<dyn RateLimitRepository>,
}

impl MaintenanceSweep {
    pub fn new(
        idempotency: Arc<dyn IdempotencyRepository>,
        windows: Arc<dyn RateLimitRepository>,
    ) -> Self {
        Self { idempotency, windows }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepSummary, ApplicationError> {
        let expired_idempotency_records =
            self.idempotency.purge_expired(now).await.map_err(repository_error)?;
        let stale_rate_windows = self
            .windows
            .purge_stale(now - Duration::seconds(WINDOW_SECS))
            .await
            .map_err(repository_error)?;

        let summary = SweepSummary { expired_idempotency_records, stale_rate_windows };
        info!(
            event_name = "maintenance.sweep.completed",
            expired_idempotency_records,
            stale_rate_windows,
            "maintenance sweep finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use dialsync_core::domain::idempotency::{CachedResponse, IdempotencyKey};
    use dialsync_core::domain::TenantId;
    use dialsync_db::repositories::{InMemoryIdempotencyRepository, InMemoryRateLimitRepository};
    use dialsync_db::RateLimitRepository;

    use super::{MaintenanceSweep, SweepSummary};
    use crate::idempotency::IdempotencyCache;

    #[tokio::test]
    async fn sweep_purges_expired_records_and_old_windows() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        let records = Arc::new(InMemoryIdempotencyRepository::default());
        let windows = Arc::new(InMemoryRateLimitRepository::default());
        let cache = IdempotencyCache::new(records.clone(), 1);
        let tenant = TenantId("tenant-a".to_string());
        let response = CachedResponse { status_code: 200, content_type: None, body: Vec::new() };

        cache
            .store(&tenant, &IdempotencyKey("old".to_string()), "h", response.clone(), now - Duration::days(2))
            .await
            .expect("old");
        cache
            .store(&tenant, &IdempotencyKey("new".to_string()), "h", response, now)
            .await
            .expect("new");
        windows.hit("stale", now - Duration::minutes(5), 60_000).await.expect("stale");
        windows.hit("live", now - Duration::seconds(10), 60_000).await.expect("live");

        let sweep = MaintenanceSweep::new(records, windows);
        let summary = sweep.run_once(now).await.expect("sweep");

        assert_eq!(
            summary,
            SweepSummary { expired_idempotency_records: 1, stale_rate_windows: 1 }
        );
    }
}
