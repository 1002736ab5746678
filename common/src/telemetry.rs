// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging.
///
/// Log levels come from `RUST_LOG` when set, otherwise from the
/// configured default.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_thread_ids(true),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    Ok(())
}

/// Initialize human-readable logging (development)
pub fn init_human_logging(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    Ok(())
}

/// Initialize the Prometheus metrics exporter and describe all metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("db_queries_total", "Total number of executed statements");
    describe_counter!("db_query_failures_total", "Total number of failed statements");
    describe_histogram!(
        "db_query_duration_seconds",
        "Statement execution duration in seconds"
    );
    describe_counter!(
        "db_transactions_total",
        "Total number of transaction scopes by outcome"
    );
    describe_counter!("cache_commands_total", "Total number of cache commands");
    describe_counter!(
        "cache_command_failures_total",
        "Total number of failed cache commands"
    );
    describe_counter!(
        "cache_reconnect_attempts_total",
        "Total number of cache reconnection attempts"
    );
    describe_gauge!(
        "resource_ready",
        "Whether a resource component is in the ready state (1) or not (0)"
    );

    tracing::info!(
        metrics_port = metrics_port,
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Record an executed statement and its duration
#[inline]
pub fn record_query(duration_seconds: f64) {
    counter!("db_queries_total").increment(1);
    histogram!("db_query_duration_seconds").record(duration_seconds);
}

/// Record a failed statement
#[inline]
pub fn record_query_failure() {
    counter!("db_query_failures_total").increment(1);
}

/// Record a resolved transaction scope
#[inline]
pub fn record_transaction(outcome: &'static str) {
    counter!("db_transactions_total", "outcome" => outcome).increment(1);
}

/// Record a cache command
#[inline]
pub fn record_cache_command(command: &'static str) {
    counter!("cache_commands_total", "command" => command).increment(1);
}

/// Record a failed cache command
#[inline]
pub fn record_cache_failure(command: &'static str) {
    counter!("cache_command_failures_total", "command" => command).increment(1);
}

/// Record one cache reconnection attempt
#[inline]
pub fn record_cache_reconnect_attempt() {
    counter!("cache_reconnect_attempts_total").increment(1);
}

/// Flip the readiness gauge for a component
#[inline]
pub fn set_component_ready(component: &'static str, ready: bool) {
    gauge!("resource_ready", "component" => component).set(if ready { 1.0 } else { 0.0 });
}
