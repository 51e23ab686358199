use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use dialsync_core::domain::resource::{ResourceId, SyncStatus, SyncedResource};
use dialsync_core::drift::DriftReport;
use dialsync_core::errors::ApplicationError;
use dialsync_db::ResourceRepository;

use crate::resources::ResourceSynchronizer;
use crate::{repository_error, OperationContext};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriftSweepReport {
    pub checked: u32,
    pub drifted: u32,
    pub applied: u32,
    pub reports: Vec<DriftReport>,
    pub failures: Vec<SweepFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub resource_id: ResourceId,
    pub error: String,
}

/// Runs the refresh check over a tenant's resources. One resource failing
/// does not stop the sweep.
pub struct DriftSweep {
    resources: Arc<dyn ResourceRepository>,
    synchronizer: Arc<ResourceSynchronizer>,
}

impl DriftSweep {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        synchronizer: Arc<ResourceSynchronizer>,
    ) -> Self {
        Self { resources, synchronizer }
    }

    pub async fn run(
        &self,
        ctx: &OperationContext,
        apply: bool,
    ) -> Result<DriftSweepReport, ApplicationError> {
        let candidates = self
            .resources
            .list(&ctx.tenant_id, None)
            .await
            .map_err(repository_error)?
            .into_iter()
            .filter(is_sweepable);

        let mut summary = DriftSweepReport::default();
        for resource in candidates {
            summary.checked += 1;
            match self.synchronizer.refresh(ctx, &resource.id, apply).await {
                Ok(outcome) => {
                    if outcome.report.has_drift {
                        summary.drifted += 1;
                        summary.reports.push(outcome.report);
                    }
                    if outcome.applied {
                        summary.applied += 1;
                    }
                }
                Err(failure) => {
                    warn!(
                        event_name = "drift.sweep.resource_failed",
                        correlation_id = %ctx.correlation_id,
                        tenant_id = %ctx.tenant_id,
                        resource_id = %resource.id,
                        error = %failure,
                        "could not check resource against provider"
                    );
                    summary
                        .failures
                        .push(SweepFailure { resource_id: resource.id, error: failure.to_string() });
                }
            }
        }

        info!(
            event_name = "drift.sweep.completed",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            checked = summary.checked,
            drifted = summary.drifted,
            applied = summary.applied,
            failed = summary.failures.len(),
            "drift sweep finished"
        );
        Ok(summary)
    }
}

// Drafts were never synced, and deleted rows without a remote id have
// nothing left to compare.
fn is_sweepable(resource: &SyncedResource) -> bool {
    match resource.status {
        SyncStatus::Draft | SyncStatus::Creating => false,
        SyncStatus::Deleted => resource.remote_id.is_some(),
        SyncStatus::Active | SyncStatus::Failed => true,
    }
}
