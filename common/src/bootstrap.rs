// Bootstrap utilities and the process-wide service registry.
// Each resource component is constructed exactly once at startup and
// handed to consumers by reference.

use crate::cache::CacheClient;
use crate::config::Settings;
use crate::db::Database;
use crate::errors::CacheError;
use crate::health::{HealthCheckable, HealthReport, HealthStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Initialize the relational store manager
///
/// # Errors
/// Returns error if the pool cannot be established or the liveness
/// probe fails
#[tracing::instrument(skip(settings))]
pub async fn init_database(settings: &Settings) -> Result<Arc<Database>> {
    info!("Initializing database pool");

    let database = Arc::new(Database::new(settings.database.clone()));
    database
        .connect()
        .await
        .context("Failed to initialize database pool")?;

    info!("Database pool initialized");
    Ok(database)
}

/// Initialize the cache and messaging client
///
/// # Errors
/// Returns error if any of the cache connections cannot be established
#[tracing::instrument(skip(settings))]
pub async fn init_cache(settings: &Settings) -> Result<Arc<CacheClient>> {
    info!("Initializing cache client");

    let cache = Arc::new(CacheClient::new(settings.redis.clone()));
    cache
        .connect()
        .await
        .context("Failed to initialize cache client")?;

    info!("Cache client initialized");
    Ok(cache)
}

/// Aggregated health of every registered component
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub components: Vec<HealthReport>,
}

/// Process-wide registry owning both resource components.
///
/// Constructed once at startup, cloned (cheaply) into request handlers
/// and background jobs; `shutdown` is called once during graceful
/// teardown.
#[derive(Clone)]
pub struct ServiceRegistry {
    database: Arc<Database>,
    cache: Arc<CacheClient>,
}

impl ServiceRegistry {
    /// Connect both components in startup order: the relational store
    /// first, then the cache.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let database = init_database(settings).await?;
        let cache = init_cache(settings).await?;
        Ok(Self { database, cache })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn cache(&self) -> &Arc<CacheClient> {
        &self.cache
    }

    /// Re-establish the cache connections after the reconnection budget
    /// was exhausted. The terminal degraded state is deliberate; this is
    /// the explicit escape hatch for the owning process.
    pub async fn reconnect_cache(&self) -> Result<(), CacheError> {
        self.cache.connect().await
    }

    fn components(&self) -> [Arc<dyn HealthCheckable>; 2] {
        [
            Arc::clone(&self.database) as Arc<dyn HealthCheckable>,
            Arc::clone(&self.cache) as Arc<dyn HealthCheckable>,
        ]
    }

    /// Probe every component. Consumed by the process-level `/health`
    /// endpoint; never raises.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let mut components = Vec::with_capacity(2);
        for component in self.components() {
            components.push(component.health_check().await);
        }

        let status = if components.iter().all(HealthReport::is_healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthSnapshot { status, components }
    }

    /// Close both components, bounded by the shutdown grace timer.
    ///
    /// # Errors
    /// Returns error if teardown does not finish within `grace`; the
    /// caller is expected to terminate the process.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        info!(grace_seconds = grace.as_secs(), "Shutting down resource components");

        let close_all = async {
            self.database.close().await;
            self.cache.close().await;
        };

        match tokio::time::timeout(grace, close_all).await {
            Ok(()) => {
                info!("Resource components closed");
                Ok(())
            }
            Err(_) => {
                error!("Could not close connections within the grace period");
                Err(anyhow::anyhow!(
                    "shutdown exceeded the {}s grace period",
                    grace.as_secs()
                ))
            }
        }
    }
}
