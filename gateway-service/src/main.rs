use gateway_service::{config::GatewayConfig, services::metrics::init_metrics, Application};
use service_core::observability::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = GatewayConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authorization gateway"
    );

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to start gateway service");
        e
    })?;
    tracing::info!(port = application.port(), "Listening");

    application.run_until_stopped().await?;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}
