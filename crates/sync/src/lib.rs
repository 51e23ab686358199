//! Services that keep the local mirror and the remote provider consistent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_db::RepositoryError;

pub mod calls;
pub mod drift;
pub mod followup;
pub mod idempotency;
pub mod maintenance;
pub mod rate_limit;
pub mod resources;
pub mod services;
pub mod webhook;

pub use calls::{CallLauncher, StartCall};
pub use drift::{DriftSweep, DriftSweepReport};
pub use followup::FollowUpRunner;
pub use idempotency::IdempotencyCache;
pub use maintenance::{MaintenanceSweep, SweepSummary};
pub use rate_limit::RateLimiter;
pub use resources::{DeleteAck, RefreshOutcome, ResourceSynchronizer};
pub use services::{Services, Stores};
pub use webhook::{EventDispatcher, WebhookError, WebhookIngest};

/// Who is asking, and when. Services never read the clock themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub tenant_id: TenantId,
    pub correlation_id: String,
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(tenant_id: TenantId, correlation_id: impl Into<String>) -> Self {
        Self { tenant_id, correlation_id: correlation_id.into(), now: Utc::now() }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

pub fn new_correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

pub fn repository_error(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::Conflict(message) => ApplicationError::Conflict(message),
        other => ApplicationError::Persistence(other.to_string()),
    }
}
