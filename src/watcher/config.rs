//! Monitor configuration with call-time validation

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::WatcherError;
use super::events::BalanceChangeEvent;

/// Expected decoded length of an account address, in bytes
pub const ACCOUNT_ADDRESS_LEN: usize = 32;

/// Default bounded reconnect attempts per connect cycle
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base backoff unit in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Consistency level a balance snapshot must reach before being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Observed by the node, may still be rolled back
    Processed,
    /// Voted on by a supermajority
    #[default]
    Confirmed,
    /// Rooted, will not be rolled back
    Finalized,
}

impl Commitment {
    /// String form used on the wire and in config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(WatcherError::config(format!(
                "unknown commitment level '{other}'"
            ))),
        }
    }
}

/// Callback invoked for each accepted balance change
pub type BalanceChangeCallback = Arc<dyn Fn(&BalanceChangeEvent) + Send + Sync>;

/// Callback invoked for each failure the monitor absorbs
pub type ErrorCallback = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// Callback invoked once per successful re-establishment after a disconnect
pub type ReconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration for a single account monitor
///
/// Built with [`MonitorConfig::new`] plus the builder-style setters, then
/// validated by `start_monitor` before any background work starts. All
/// callbacks are optional; an absent callback is a no-op branch.
#[derive(Clone)]
pub struct MonitorConfig {
    /// Account to watch, base58-encoded
    pub account_address: String,
    /// Primary RPC endpoint for point-in-time reads
    pub rpc_endpoint: String,
    /// Streaming endpoint for push subscriptions
    pub ws_endpoint: String,
    /// Consistency level for reads and notifications
    pub commitment: Commitment,
    /// Minimum time between delivered callbacks, 0 = no throttling
    pub update_interval_ms: u64,
    /// Bounded reconnect attempts per connect cycle (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Base backoff unit between reconnect attempts
    pub retry_delay_ms: u64,
    /// Invoked for each accepted balance change
    pub on_balance_change: Option<BalanceChangeCallback>,
    /// Invoked for each failure (connect, disconnect, balance fetch)
    pub on_error: Option<ErrorCallback>,
    /// Invoked once per successful reconnect
    pub on_reconnect: Option<ReconnectCallback>,
}

impl MonitorConfig {
    /// Create a config with default retry policy and no callbacks
    pub fn new(
        account_address: impl Into<String>,
        rpc_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            account_address: account_address.into(),
            rpc_endpoint: rpc_endpoint.into(),
            ws_endpoint: ws_endpoint.into(),
            commitment: Commitment::default(),
            update_interval_ms: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            on_balance_change: None,
            on_error: None,
            on_reconnect: None,
        }
    }

    /// Set the commitment level
    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    /// Set the minimum time between delivered callbacks (0 disables throttling)
    pub fn with_update_interval_ms(mut self, interval_ms: u64) -> Self {
        self.update_interval_ms = interval_ms;
        self
    }

    /// Set the bounded reconnect attempt count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base backoff unit
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the balance change callback
    pub fn on_balance_change(mut self, cb: BalanceChangeCallback) -> Self {
        self.on_balance_change = Some(cb);
        self
    }

    /// Set the error callback
    pub fn on_error(mut self, cb: ErrorCallback) -> Self {
        self.on_error = Some(cb);
        self
    }

    /// Set the reconnect callback
    pub fn on_reconnect(mut self, cb: ReconnectCallback) -> Self {
        self.on_reconnect = Some(cb);
        self
    }

    /// The throttle window as a `Duration`
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Validate configuration parameters
    ///
    /// The address must decode from base58 to exactly 32 bytes; both
    /// endpoints must be non-empty. Invalid input fails here, before any
    /// background task is spawned.
    pub fn validate(&self) -> Result<(), WatcherError> {
        let decoded = bs58::decode(&self.account_address)
            .into_vec()
            .map_err(|e| {
                WatcherError::config(format!(
                    "account address '{}' is not valid base58: {e}",
                    self.account_address
                ))
            })?;

        if decoded.len() != ACCOUNT_ADDRESS_LEN {
            return Err(WatcherError::config(format!(
                "account address '{}' decodes to {} bytes, expected {}",
                self.account_address,
                decoded.len(),
                ACCOUNT_ADDRESS_LEN
            )));
        }

        if self.rpc_endpoint.is_empty() {
            return Err(WatcherError::config("rpc_endpoint must not be empty"));
        }
        if self.ws_endpoint.is_empty() {
            return Err(WatcherError::config("ws_endpoint must not be empty"));
        }

        Ok(())
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("account_address", &self.account_address)
            .field("rpc_endpoint", &self.rpc_endpoint)
            .field("ws_endpoint", &self.ws_endpoint)
            .field("commitment", &self.commitment)
            .field("update_interval_ms", &self.update_interval_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("on_balance_change", &self.on_balance_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_address() -> String {
        bs58::encode([7u8; ACCOUNT_ADDRESS_LEN]).into_string()
    }

    #[test]
    fn test_default_config_valid() {
        let config = MonitorConfig::new(valid_address(), "http://localhost:8899", "ws://localhost:8900");

        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.update_interval_ms, 0);
    }

    #[test]
    fn test_invalid_base58_rejected() {
        let config = MonitorConfig::new("not-base58-0OIl", "http://x", "ws://x");
        let err = config.validate().unwrap_err();

        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_wrong_length_rejected() {
        // Valid base58, but decodes to fewer than 32 bytes
        let config = MonitorConfig::new("abc", "http://x", "ws://x");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let config = MonitorConfig::new(valid_address(), "", "ws://x");
        assert!(config.validate().is_err());

        let config = MonitorConfig::new(valid_address(), "http://x", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_commitment_parse() {
        assert_eq!(
            "processed".parse::<Commitment>().unwrap(),
            Commitment::Processed
        );
        assert_eq!(
            "finalized".parse::<Commitment>().unwrap(),
            Commitment::Finalized
        );
        assert!("final".parse::<Commitment>().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = MonitorConfig::new(valid_address(), "http://x", "ws://x")
            .with_commitment(Commitment::Finalized)
            .with_update_interval_ms(5000)
            .with_max_retries(3)
            .with_retry_delay_ms(200)
            .on_reconnect(Arc::new(|| {}));

        assert_eq!(config.commitment, Commitment::Finalized);
        assert_eq!(config.update_interval(), Duration::from_millis(5000));
        assert_eq!(config.max_retries, 3);
        assert!(config.on_reconnect.is_some());
        assert!(config.on_balance_change.is_none());
    }
}
