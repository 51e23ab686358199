use chrono::Utc;
use dialsync_core::config::LoadOptions;
use dialsync_sync::{MaintenanceSweep, Stores};
use serde_json::json;

use crate::commands::{
    load_config, open_migrated_pool, runtime, CommandFailure, CommandResult, EXIT_SWEEP,
};

/// One maintenance pass: expired idempotency records and stale rate windows.
pub fn run(options: LoadOptions) -> CommandResult {
    match execute(options) {
        Ok(result) => result,
        Err(failure) => failure.into_result("sweep"),
    }
}

fn execute(options: LoadOptions) -> Result<CommandResult, CommandFailure> {
    let config = load_config(options)?;
    let runtime = runtime()?;

    let summary = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let stores = Stores::sql(pool.clone());
        let sweep = MaintenanceSweep::new(stores.idempotency, stores.rate_limits);
        let summary = sweep
            .run_once(Utc::now())
            .await
            .map_err(|error| CommandFailure::new("sweep", error.to_string(), EXIT_SWEEP));
        pool.close().await;
        summary
    })?;

    Ok(CommandResult::success_with_details(
        "sweep",
        format!(
            "purged {} expired idempotency records and {} stale rate-limit windows",
            summary.expired_idempotency_records, summary.stale_rate_windows
        ),
        Some(json!(summary)),
    ))
}
