use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use agentbus::api::{self, AppState};
use agentbus::config::Settings;
use agentbus::{
    CleanupScheduler, EventBusService, MemoryBroadcastRepository, MemoryStreamRepository,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting agentbus server");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let broadcasts = Arc::new(MemoryBroadcastRepository::new(settings.buffer.max_events));
    let streams = Arc::new(MemoryStreamRepository::new(broadcasts.clone()));
    let service = Arc::new(EventBusService::new(broadcasts, streams));

    let scheduler = Arc::new(CleanupScheduler::new(
        service.clone(),
        Duration::from_secs(settings.cleanup.interval_minutes * 60),
        chrono::Duration::minutes(settings.cleanup.timeout_minutes),
    ));
    scheduler.start().await;

    let app = api::router(AppState { service });

    let addr = format!("{}:{}", settings.host, settings.port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install ctrl-c handler: {e}");
        return;
    }
    info!("Shutdown signal received");
}
