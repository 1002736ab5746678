// Server binary entry point: brings up the resource registry, logs its
// health while running, and tears it down within the shutdown grace
// period.

use anyhow::Result;
use common::bootstrap::ServiceRegistry;
use common::config::Settings;
use common::health::HealthStatus;
use common::telemetry;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings =
        Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    info!("Starting marketplace resource services");

    telemetry::init_metrics(settings.observability.metrics_port)?;

    let registry = match ServiceRegistry::connect(&settings).await {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to initialize resource components");
            return Err(e);
        }
    };

    // Periodic health visibility while the process runs
    let health_registry = registry.clone();
    let health_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let snapshot = health_registry.health_snapshot().await;
            if snapshot.status == HealthStatus::Healthy {
                info!(
                    pool_size = health_registry.database().pool_size(),
                    pool_idle = health_registry.database().idle_connections(),
                    "Resource components healthy"
                );
            } else {
                for report in &snapshot.components {
                    if !report.is_healthy() {
                        warn!(
                            component = %report.component,
                            state = ?report.state,
                            error = report.error.as_deref().unwrap_or("unknown"),
                            "Component unhealthy"
                        );
                    }
                }
            }
        }
    });

    info!("Resource services running. Press Ctrl+C to shutdown gracefully");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    health_task.abort();

    let grace = Duration::from_secs(settings.server.shutdown_grace_seconds);
    if registry.shutdown(grace).await.is_err() {
        // Grace period elapsed; terminate without waiting further
        std::process::exit(1);
    }

    info!("Shutdown complete");
    Ok(())
}
