/// Configuration management for Miniblog Service
///
/// Loads configuration from environment variables.
use anyhow::{bail, Context, Result};
use event_queue::KafkaQueueConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Storage backend selection
    pub storage: StorageConfig,
    /// Redis cache; `None` uses the in-process cache
    pub redis: Option<RedisConfig>,
    /// Kafka queue; `None` uses the in-process queue
    pub kafka: Option<KafkaQueueConfig>,
    /// Fan-out worker settings
    pub fanout: FanoutConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
    /// Which parts of the service this process runs
    pub role: ServiceRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// HTTP API only
    Api,
    /// Fan-out worker only
    Worker,
    /// Both in one process
    All,
}

impl ServiceRole {
    pub fn runs_api(&self) -> bool {
        matches!(self, ServiceRole::Api | ServiceRole::All)
    }

    pub fn runs_worker(&self) -> bool {
        matches!(self, ServiceRole::Worker | ServiceRole::All)
    }
}

impl FromStr for ServiceRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(ServiceRole::Api),
            "worker" => Ok(ServiceRole::Worker),
            "all" => Ok(ServiceRole::All),
            other => bail!("unknown SERVICE_ROLE '{}' (expected api, worker or all)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres(DatabaseConfig),
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Concurrent consumer tasks
    pub concurrency: usize,
    /// Deadline for applying one event
    pub task_timeout_secs: u64,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_fanout_concurrency() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    30
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: non_empty_var("PORT")
                .or_else(|| non_empty_var("SERVER_PORT"))
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            role: match non_empty_var("SERVICE_ROLE") {
                Some(raw) => raw.parse().context("invalid SERVICE_ROLE")?,
                None => ServiceRole::All,
            },
        };

        let storage_mode = std::env::var("STORAGE_MODE").unwrap_or_else(|_| "inmemory".to_string());
        let storage = match storage_mode.trim().to_ascii_lowercase().as_str() {
            "inmemory" => StorageConfig::InMemory,
            "postgres" => StorageConfig::Postgres(DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .context("DATABASE_URL environment variable not set")?,
                max_connections: std::env::var("DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_max_connections),
            }),
            other => bail!("unknown STORAGE_MODE '{}' (expected inmemory or postgres)", other),
        };

        let redis = non_empty_var("REDIS_URL").map(|url| RedisConfig { url });

        let fanout = FanoutConfig {
            concurrency: std::env::var("FANOUT_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or_else(default_fanout_concurrency),
            task_timeout_secs: std::env::var("FANOUT_TASK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or_else(default_task_timeout_secs),
        };

        let config = Config {
            app,
            storage,
            redis,
            kafka: KafkaQueueConfig::from_env(),
            fanout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations in which the worker can never see the writes.
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageConfig::InMemory && self.kafka.is_some() {
            bail!("STORAGE_MODE=inmemory cannot be combined with KAFKA_BROKERS: workers in other processes would not see the posts");
        }
        if self.app.role == ServiceRole::Worker && self.kafka.is_none() {
            bail!("SERVICE_ROLE=worker requires KAFKA_BROKERS: the in-process queue only carries events from this process");
        }
        if self.app.role == ServiceRole::Api && self.kafka.is_none() {
            bail!("SERVICE_ROLE=api requires KAFKA_BROKERS: without a shared queue no worker would consume the events");
        }
        Ok(())
    }
}
