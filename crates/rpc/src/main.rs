// Leasekeep RPC server
// Decision: Ctrl-C stops accepting HTTP requests first, then drains the engine

use anyhow::{Context, Result};
use leasekeep_engine::Engine;
use leasekeep_rpc::{init_telemetry, router, AppState, ServerConfig, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: leasekeep_engine=info,leasekeep_rpc=info,...)
    // - BIND_ADDRESS, ADD_DELAY_SECONDS and the engine's lease options
    init_telemetry(TelemetryConfig::from_env().with_service_name("leasekeep-rpc"))?;

    tracing::info!("leasekeep-rpc starting...");

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let engine = Engine::new(config.engine.clone()).context("Failed to start lease engine")?;
    let app = router(AppState::new(engine.clone(), config.add_delay));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .context("Failed to bind to address")?;
    tracing::info!(address = %config.bind_address, "RPC server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!(in_flight = engine.in_flight(), "Shutting down gracefully...");
    engine
        .shutdown()
        .await
        .context("Lease engine did not shut down cleanly")?;

    tracing::info!("RPC server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
