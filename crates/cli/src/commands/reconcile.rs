use std::sync::Arc;

use dialsync_core::config::LoadOptions;
use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_provider::HttpProvider;
use dialsync_sync::{new_correlation_id, DriftSweepReport, OperationContext, Services, Stores};
use serde_json::json;

use crate::commands::{
    load_config, open_migrated_pool, runtime, CommandFailure, CommandResult, EXIT_PROVIDER,
    EXIT_SWEEP, EXIT_USAGE,
};

/// Drift sweep over one tenant. Without `apply` nothing is written.
pub fn run(options: LoadOptions, tenant: &str, apply: bool) -> CommandResult {
    match execute(options, tenant, apply) {
        Ok(result) => result,
        Err(failure) => failure.into_result("reconcile"),
    }
}

fn execute(options: LoadOptions, tenant: &str, apply: bool) -> Result<CommandResult, CommandFailure> {
    let tenant = tenant.trim();
    if tenant.is_empty() {
        return Err(CommandFailure::new("invalid_arguments", "--tenant must not be empty", EXIT_USAGE));
    }

    let config = load_config(options)?;
    let provider = HttpProvider::new(&config.provider)
        .map_err(|error| CommandFailure::new("provider", error.to_string(), EXIT_PROVIDER))?;
    let runtime = runtime()?;

    let report = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let services = Services::build(Stores::sql(pool.clone()), Arc::new(provider), &config);
        let ctx = OperationContext::new(TenantId(tenant.to_string()), new_correlation_id());
        let report = services.drift.run(&ctx, apply).await.map_err(sweep_failure);
        pool.close().await;
        report
    })?;

    let details = Some(json!(report));
    if !report.failures.is_empty() {
        return Ok(CommandResult::failure_with_details(
            "reconcile",
            "partial_sweep",
            format!("{} of {} resources could not be checked", report.failures.len(), report.checked),
            EXIT_SWEEP,
            details,
        ));
    }
    Ok(CommandResult::success_with_details("reconcile", summarize(&report, apply), details))
}

fn summarize(report: &DriftSweepReport, apply: bool) -> String {
    match (report.drifted, apply) {
        (0, _) => format!("checked {} resources; no drift", report.checked),
        (drifted, true) => format!(
            "checked {} resources; {drifted} drifted, {} corrected",
            report.checked, report.applied
        ),
        (drifted, false) => format!(
            "checked {} resources; {drifted} drifted (rerun with --apply to correct)",
            report.checked
        ),
    }
}

fn sweep_failure(error: ApplicationError) -> CommandFailure {
    match error {
        ApplicationError::Provider(provider) => {
            CommandFailure::new("provider", provider.to_string(), EXIT_PROVIDER)
        }
        other => CommandFailure::new("sweep", other.to_string(), EXIT_SWEEP),
    }
}

#[cfg(test)]
mod tests {
    use dialsync_sync::DriftSweepReport;

    use super::summarize;

    #[test]
    fn summary_points_at_apply_when_drift_is_only_reported() {
        let report = DriftSweepReport { checked: 4, drifted: 2, ..DriftSweepReport::default() };

        assert!(summarize(&report, false).contains("--apply"));
        assert_eq!(
            summarize(&DriftSweepReport { checked: 3, ..DriftSweepReport::default() }, true),
            "checked 3 resources; no drift"
        );
    }
}
