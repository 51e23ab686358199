use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use dialsync_core::config::RateLimitConfig;
use dialsync_core::domain::rate_limit::{RateLimitDecision, RateLimitSubject, WINDOW_SECS};
use dialsync_core::errors::ApplicationError;
use dialsync_db::RateLimitRepository;

use crate::repository_error;

/// Fixed one-minute window per (tenant or client address, route), counted
/// in the shared store so every process sees the same totals.
pub struct RateLimiter {
    windows: Arc<dyn RateLimitRepository>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(windows: Arc<dyn RateLimitRepository>, config: RateLimitConfig) -> Self {
        Self { windows, config }
    }

    pub fn limit_for(&self, route: &str) -> u32 {
        self.config.limit_for(route)
    }

    pub async fn allow(
        &self,
        subject: &RateLimitSubject,
        route: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, ApplicationError> {
        let limit = self.limit_for(route);
        let hit = self
            .windows
            .hit(&subject.bucket(route), now, WINDOW_SECS * 1_000)
            .await
            .map_err(repository_error)?;
        let decision = RateLimitDecision::from_hit(subject, route, limit, hit, now);

        if let RateLimitDecision::Rejected(rejection) = &decision {
            warn!(
                event_name = "rate_limit.rejected",
                subject = %rejection.subject,
                route,
                limit,
                retry_after_secs = rejection.retry_after_secs,
                "request over the per-minute limit"
            );
        }
        Ok(decision)
    }

    /// Like [`RateLimiter::allow`], but a rejection becomes an error.
    pub async fn check(
        &self,
        subject: &RateLimitSubject,
        route: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, ApplicationError> {
        match self.allow(subject, route, now).await? {
            RateLimitDecision::Rejected(rejection) => Err(ApplicationError::RateLimited(rejection)),
            allowed => Ok(allowed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use dialsync_core::config::RateLimitConfig;
    use dialsync_core::domain::rate_limit::{RateLimitDecision, RateLimitSubject};
    use dialsync_core::domain::TenantId;
    use dialsync_core::errors::ApplicationError;
    use dialsync_db::repositories::InMemoryRateLimitRepository;

    use super::RateLimiter;

    fn limiter(default: u32, routes: &[(&str, u32)]) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryRateLimitRepository::default()),
            RateLimitConfig {
                requests_per_minute: default,
                routes: routes
                    .iter()
                    .map(|(route, limit)| ((*route).to_string(), *limit))
                    .collect::<BTreeMap<_, _>>(),
            },
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").expect("ts").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn route_overrides_and_subjects_are_counted_separately() {
        let limiter = limiter(5, &[("POST /api/v1/calls", 1)]);
        let tenant = RateLimitSubject::Tenant(TenantId("tenant-a".to_string()));
        let ip = RateLimitSubject::Ip("10.0.0.9".to_string());

        assert!(limiter.allow(&tenant, "POST /api/v1/calls", now()).await.expect("1").is_allowed());
        let error = limiter
            .check(&tenant, "POST /api/v1/calls", now())
            .await
            .expect_err("second call over limit");
        assert!(matches!(error, ApplicationError::RateLimited(ref rejection) if rejection.limit == 1));

        assert!(limiter.allow(&ip, "POST /api/v1/calls", now()).await.expect("ip").is_allowed());
        match limiter.allow(&tenant, "GET /api/v1/calls", now()).await.expect("other route") {
            RateLimitDecision::Allowed { limit, remaining, .. } => {
                assert_eq!((limit, remaining), (5, 4));
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        let next_minute = now() + Duration::seconds(60);
        assert!(limiter
            .allow(&tenant, "POST /api/v1/calls", next_minute)
            .await
            .expect("fresh window")
            .is_allowed());
    }
}
