use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::TenantId;

pub const WINDOW_SECS: i64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitSubject {
    Tenant(TenantId),
    Ip(String),
}

impl RateLimitSubject {
    pub fn bucket(&self, route: &str) -> String {
        match self {
            Self::Tenant(tenant) => format!("tenant:{}|{route}", tenant.0),
            Self::Ip(address) => format!("ip:{address}|{route}"),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Tenant(tenant) => format!("tenant:{}", tenant.0),
            Self::Ip(address) => format!("ip:{address}"),
        }
    }
}

/// Counter state after recording one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("rate limit of {limit} requests per minute exceeded for {subject} on `{route}`")]
pub struct RateLimitRejection {
    pub subject: String,
    pub route: String,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { limit: u32, remaining: u32, reset_at: DateTime<Utc> },
    Rejected(RateLimitRejection),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Turns a recorded hit into a decision. The window resets one minute
    /// after its first request.
    pub fn from_hit(
        subject: &RateLimitSubject,
        route: &str,
        limit: u32,
        hit: WindowHit,
        now: DateTime<Utc>,
    ) -> Self {
        let reset_at = hit.window_start + Duration::seconds(WINDOW_SECS);
        if hit.count <= limit {
            return Self::Allowed { limit, remaining: limit - hit.count, reset_at };
        }

        let until_reset = (reset_at - now).num_milliseconds().max(0) as u64;
        Self::Rejected(RateLimitRejection {
            subject: subject.label(),
            route: route.to_string(),
            limit,
            reset_at,
            retry_after_secs: until_reset.div_ceil(1_000).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::TenantId;

    use super::{RateLimitDecision, RateLimitSubject, WindowHit};

    #[test]
    fn hits_over_limit_are_rejected_until_window_reset() {
        let subject = RateLimitSubject::Tenant(TenantId("t-1".to_string()));
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("valid time");
        let now = start + Duration::milliseconds(2_500);

        let allowed = RateLimitDecision::from_hit(
            &subject,
            "GET /a",
            100,
            WindowHit { count: 100, window_start: start },
            now,
        );
        assert_eq!(
            allowed,
            RateLimitDecision::Allowed {
                limit: 100,
                remaining: 0,
                reset_at: start + Duration::seconds(60)
            }
        );

        let rejected = RateLimitDecision::from_hit(
            &subject,
            "GET /a",
            100,
            WindowHit { count: 101, window_start: start },
            now,
        );
        let RateLimitDecision::Rejected(rejection) = rejected else {
            panic!("101st request must be rejected");
        };
        assert_eq!(rejection.subject, "tenant:t-1");
        assert_eq!(rejection.reset_at, start + Duration::seconds(60));
        assert_eq!(rejection.retry_after_secs, 58);
    }

    #[test]
    fn buckets_are_scoped_by_subject_and_route() {
        let tenant = RateLimitSubject::Tenant(TenantId("t-1".to_string()));
        let ip = RateLimitSubject::Ip("10.0.0.7".to_string());

        assert_eq!(tenant.bucket("POST /api/v1/calls"), "tenant:t-1|POST /api/v1/calls");
        assert_eq!(ip.bucket("POST /api/v1/calls"), "ip:10.0.0.7|POST /api/v1/calls");
        assert_ne!(tenant.bucket("GET /a"), tenant.bucket("GET /b"));
    }
}
