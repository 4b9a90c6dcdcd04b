use idempotent_orders::api::create_router;
use idempotent_orders::app::{build_state, build_store};
use idempotent_orders::config::Settings;
use idempotent_orders::idempotency::{IdempotencyCleanupJob, IdempotencyStore};
use idempotent_orders::observability::{init_logging, init_metrics};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&settings.application.log_config());
    info!("Configuration loaded");

    let metrics_handle = init_metrics();

    let store = build_store(&settings)?;
    info!(backend = store.backend_name(), "Idempotency store ready");
    if let Err(e) = store.health_check().await {
        tracing::warn!("Idempotency store not reachable at startup: {}", e);
    }

    let state = build_state(&settings, store, true)?.with_metrics(metrics_handle);
    info!(
        routes = state.idempotency.registry.len(),
        "Deduplicated routes registered"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = match settings.idempotency.sweep_interval_seconds {
        0 => None,
        interval => Some(
            IdempotencyCleanupJob::new(Arc::clone(&state.idempotency.handler), interval)
                .start(shutdown_rx),
        ),
    };

    let app = create_router(state);
    let address = settings.application.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    shutdown_tx.send(true).ok();
    if let Some(cleanup) = cleanup {
        cleanup.await.ok();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
