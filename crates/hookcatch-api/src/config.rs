//! Configuration management for the hookcatch service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookcatch_delivery::{EngineConfig, RetryPolicy, DEFAULT_SWEEP_BATCH_SIZE};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderSecrets;

const CONFIG_FILE: &str = "hookcatch.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`hookcatch.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Webhook secrets default to empty, and a provider with an empty secret
/// rejects every request until one is configured.
///
/// # Example
///
/// ```no_run
/// use hookcatch_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_ACQUIRE_TIMEOUT_SECS`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_ACQUIRE_TIMEOUT_SECS")]
    pub database_acquire_timeout_secs: u64,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECS`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    // Processing
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `WORKER_COUNT`
    #[serde(default = "default_worker_count", alias = "WORKER_COUNT")]
    pub worker_count: usize,
    /// Attempts before a delivery is dead-lettered.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts", alias = "MAX_ATTEMPTS")]
    pub max_attempts: u32,
    /// Delay in seconds before retry 1, 2, 3...; the last entry repeats.
    ///
    /// Environment variable: `RETRY_BACKOFF_SECS` (e.g. `[30,120,600]`)
    #[serde(default = "default_retry_backoff", alias = "RETRY_BACKOFF_SECS")]
    pub retry_backoff_secs: Vec<u64>,
    /// Seconds between sweeper passes.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[serde(default = "default_sweep_interval", alias = "SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,
    /// Seconds an attempt may stay in `processing` before it is recovered.
    ///
    /// Environment variable: `PROCESSING_TIMEOUT_SECS`
    #[serde(default = "default_processing_timeout", alias = "PROCESSING_TIMEOUT_SECS")]
    pub processing_timeout_secs: u64,
    /// Age in seconds after which a `pending` delivery is requeued.
    ///
    /// Environment variable: `PICKUP_GRACE_SECS`
    #[serde(default = "default_pickup_grace", alias = "PICKUP_GRACE_SECS")]
    pub pickup_grace_secs: u64,
    /// Seconds to wait for workers on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: u64,

    // Providers
    /// Allowed clock skew for Stripe signature timestamps.
    ///
    /// Environment variable: `STRIPE_TIMESTAMP_TOLERANCE_SECS`
    #[serde(default = "default_stripe_tolerance", alias = "STRIPE_TIMESTAMP_TOLERANCE_SECS")]
    pub stripe_timestamp_tolerance_secs: u64,
    /// Environment variable: `GITHUB_WEBHOOK_SECRET`
    #[serde(default, alias = "GITHUB_WEBHOOK_SECRET")]
    pub github_webhook_secret: String,
    /// Environment variable: `STRIPE_WEBHOOK_SECRET`
    #[serde(default, alias = "STRIPE_WEBHOOK_SECRET")]
    pub stripe_webhook_secret: String,
    /// Environment variable: `GENERIC_WEBHOOK_SECRET`
    #[serde(default, alias = "GENERIC_WEBHOOK_SECRET")]
    pub generic_webhook_secret: String,

    // Admin
    /// HS256 key for admin bearer tokens.
    ///
    /// Environment variable: `JWT_SECRET`
    #[serde(default, alias = "JWT_SECRET")]
    pub jwt_secret: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        let config = Self::figment().extract::<Self>().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw())
    }

    /// Engine settings for workers and the sweeper.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_count: self.worker_count,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            processing_timeout: Duration::from_secs(self.processing_timeout_secs),
            pickup_grace: Duration::from_secs(self.pickup_grace_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Retry policy for the state machine.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.max_attempts, &self.retry_backoff_secs)
    }

    /// Secrets and tolerances for the provider registry.
    pub fn provider_secrets(&self) -> ProviderSecrets {
        ProviderSecrets {
            github: self.github_webhook_secret.clone(),
            stripe: self.stripe_webhook_secret.clone(),
            generic: self.generic_webhook_secret.clone(),
            stripe_tolerance: Duration::from_secs(self.stripe_timestamp_tolerance_secs),
        }
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database_min_connections cannot exceed database_max_connections");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.retry_backoff_secs.is_empty() {
            anyhow::bail!("retry_backoff_secs must contain at least one delay");
        }

        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_acquire_timeout_secs: default_acquire_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            sweep_interval_secs: default_sweep_interval(),
            processing_timeout_secs: default_processing_timeout(),
            pickup_grace_secs: default_pickup_grace(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            stripe_timestamp_tolerance_secs: default_stripe_tolerance(),
            github_webhook_secret: String::new(),
            stripe_webhook_secret: String::new(),
            generic_webhook_secret: String::new(),
            jwt_secret: String::new(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/hookcatch".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_worker_count() -> usize {
    hookcatch_delivery::DEFAULT_WORKER_COUNT
}

fn default_max_attempts() -> u32 {
    hookcatch_delivery::MAX_ATTEMPTS
}

fn default_retry_backoff() -> Vec<u64> {
    vec![30, 120, 600]
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_processing_timeout() -> u64 {
    300
}

fn default_pickup_grace() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_stripe_tolerance() -> u64 {
    300
}
