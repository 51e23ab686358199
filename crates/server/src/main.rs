mod api;
mod bootstrap;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dialsync_core::config::{AppConfig, LoadOptions};
use dialsync_sync::MaintenanceSweep;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;

fn init_logging(config: &AppConfig) {
    use dialsync_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let maintenance = spawn_maintenance(
        app.services.maintenance.clone(),
        Duration::from_secs(app.config.idempotency.sweep_interval_secs),
    );
    let router = api::router(AppState::new(app.services.clone()))
        .merge(health::router(app.db_pool.clone(), app.services.followups.clone()));

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "dialsync-server listening"
    );
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        pending_followups = app.services.followups.pending(),
        "dialsync-server stopping"
    );
    maintenance.abort();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.services.followups.drain()).await.is_err() {
        warn!(
            event_name = "system.server.followups_abandoned",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "follow-up jobs still running at shutdown deadline"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

fn spawn_maintenance(sweep: Arc<MaintenanceSweep>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(failure) = sweep.run_once(Utc::now()).await {
                warn!(
                    event_name = "maintenance.sweep.failed",
                    correlation_id = "maintenance",
                    error = %failure,
                    "maintenance sweep failed; retrying next interval"
                );
            }
        }
    })
}

async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(failure) = tokio::signal::ctrl_c().await {
            error!(
                event_name = "system.server.signal_error",
                correlation_id = "shutdown",
                error = %failure,
                "could not listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
