//! Application configuration for the monitor CLI
//!
//! Loaded from a TOML file with environment variable overrides; values the
//! file omits fall back to the documented defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::watcher::{Commitment, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// RPC endpoints configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Accounts to watch and how
    #[serde(default)]
    pub watch: WatchConfig,

    /// Telemetry reporting
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP endpoint for point-in-time reads
    #[serde(default = "default_http_endpoint")]
    pub http_endpoint: String,

    /// WebSocket endpoint for push subscriptions
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Base58 account addresses to monitor
    #[serde(default)]
    pub accounts: Vec<String>,

    /// Commitment level for reads and notifications
    #[serde(default)]
    pub commitment: Commitment,

    /// Minimum time between delivered callbacks per account (0 = unthrottled)
    #[serde(default)]
    pub update_interval_ms: u64,

    /// Bounded reconnect attempts per connect cycle
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff unit between reconnect attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Stop after this many seconds; absent = run until SIGINT
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between telemetry snapshot log lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

// Default value functions
fn default_http_endpoint() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}
fn default_ws_endpoint() -> String {
    "wss://api.mainnet-beta.solana.com".to_string()
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_stats_interval() -> u64 {
    60
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_endpoint: default_http_endpoint(),
            ws_endpoint: default_ws_endpoint(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            commitment: Commitment::default(),
            update_interval_ms: 0,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            duration_secs: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&contents).context("failed to parse TOML config")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("MONITOR_HTTP_ENDPOINT") {
            self.rpc.http_endpoint = endpoint;
        }

        if let Ok(endpoint) = std::env::var("MONITOR_WS_ENDPOINT") {
            self.rpc.ws_endpoint = endpoint;
        }

        if let Ok(commitment) = std::env::var("MONITOR_COMMITMENT") {
            self.watch.commitment = commitment
                .parse()
                .map_err(|e| anyhow!("invalid MONITOR_COMMITMENT: {e}"))?;
        }

        if let Ok(interval) = std::env::var("MONITOR_UPDATE_INTERVAL_MS") {
            self.watch.update_interval_ms = interval
                .parse()
                .map_err(|e| anyhow!("invalid MONITOR_UPDATE_INTERVAL_MS: {e}"))?;
        }

        self.validate()?;
        Ok(())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.rpc.http_endpoint.is_empty() {
            return Err(anyhow!("rpc.http_endpoint must not be empty"));
        }
        if self.rpc.ws_endpoint.is_empty() {
            return Err(anyhow!("rpc.ws_endpoint must not be empty"));
        }
        if self.monitoring.stats_interval_secs == 0 {
            return Err(anyhow!("monitoring.stats_interval_secs must be > 0"));
        }
        Ok(())
    }
}
