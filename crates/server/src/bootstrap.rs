use std::sync::Arc;

use dialsync_core::config::{AppConfig, ConfigError};
use dialsync_core::errors::ProviderError;
use dialsync_db::{connect_with_settings, migrations, DbPool};
use dialsync_provider::HttpProvider;
use dialsync_sync::{Services, Stores};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("provider client could not be built: {0}")]
    Provider(#[source] ProviderError),
}

/// Configs built in code skip `AppConfig::load`, so validation runs again here.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = %config.provider.name,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let provider = HttpProvider::new(&config.provider).map_err(BootstrapError::Provider)?;
    let services = Services::build(Stores::sql(db_pool.clone()), Arc::new(provider), &config);

    Ok(Application { config, db_pool, services })
}
