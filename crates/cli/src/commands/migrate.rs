use dialsync_core::config::LoadOptions;
use dialsync_db::migrations::MIGRATOR;
use serde_json::json;

use crate::commands::{load_config, open_migrated_pool, runtime, CommandFailure, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    match execute(options) {
        Ok(result) => result,
        Err(failure) => failure.into_result("migrate"),
    }
}

fn execute(options: LoadOptions) -> Result<CommandResult, CommandFailure> {
    let config = load_config(options)?;
    let runtime = runtime()?;

    runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        pool.close().await;
        Ok::<(), CommandFailure>(())
    })?;

    let known = MIGRATOR.iter().filter(|migration| !migration.migration_type.is_down_migration()).count();
    Ok(CommandResult::success_with_details(
        "migrate",
        "applied pending migrations",
        Some(json!({ "known_migrations": known })),
    ))
}
