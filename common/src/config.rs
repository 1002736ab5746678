// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds granted to in-flight work and resource teardown during
    /// graceful shutdown before the process is terminated forcefully.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Pooled connections idle longer than this are reaped.
    pub idle_timeout_seconds: u64,
    /// Upper bound on waiting for a free pooled connection.
    pub acquire_timeout_seconds: u64,
    /// Upper bound on the initial liveness probe at connect time.
    pub connect_timeout_seconds: u64,
}

/// Redis connection and reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    /// Base reconnect delay; attempt `n` waits `min(n * base, max)`.
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// After this many failed reconnection attempts the client stays
    /// degraded until `connect()` is called again.
    pub reconnect_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Settings::default();

        let builder = Config::builder()
            // Start from the built-in defaults so partial files are valid
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            return Err("Database min_connections cannot exceed max_connections".to_string());
        }
        if self.database.acquire_timeout_seconds == 0 {
            return Err("Database acquire_timeout_seconds must be greater than 0".to_string());
        }

        if self.redis.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.redis.reconnect_base_delay_ms == 0 {
            return Err("Redis reconnect_base_delay_ms must be greater than 0".to_string());
        }
        if self.redis.reconnect_max_delay_ms < self.redis.reconnect_base_delay_ms {
            return Err(
                "Redis reconnect_max_delay_ms cannot be less than reconnect_base_delay_ms"
                    .to_string(),
            );
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                shutdown_grace_seconds: 10,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/marketplace".to_string(),
                max_connections: 20,
                min_connections: 5,
                idle_timeout_seconds: 10,
                acquire_timeout_seconds: 30,
                connect_timeout_seconds: 5,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                connect_timeout_seconds: 5,
                reconnect_base_delay_ms: 100,
                reconnect_max_delay_ms: 3000,
                reconnect_max_attempts: 10,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
            },
        }
    }
}
