//! Error types and retry policies for the account watcher

use std::time::Duration;
use thiserror::Error;

/// Main error type for watcher operations
///
/// Only `Config` ever crosses the `start_monitor` boundary; every other
/// variant is delivered through the configured error callback.
#[derive(Error, Debug, Clone)]
pub enum WatcherError {
    /// Monitor configuration rejected before any background work started
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection or subscription setup failed
    #[error("connect error: {0}")]
    Connect(String),

    /// An established subscription's underlying connection dropped
    #[error("subscription lost: {0}")]
    Disconnect(String),

    /// Connect retries exhausted; the monitor will not retry on its own
    #[error("retry limit exceeded after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total connect attempts made in this cycle
        attempts: u32,
        /// Error from the final failed attempt
        last_error: String,
    },

    /// Point-in-time balance read failed
    #[error("balance fetch error: {0}")]
    BalanceFetch(String),
}

impl WatcherError {
    /// Check if this error is potentially retryable
    ///
    /// Returns `true` if retrying the operation might succeed,
    /// `false` if the error is fatal or non-retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Disconnect(_) => true,
            Self::BalanceFetch(_) => true,
            Self::Config(_) => false,
            Self::RetriesExhausted { .. } => false,
        }
    }

    /// Get the error category for logging and telemetry
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::RetriesExhausted { .. } => "retry_exhausted",
            Self::BalanceFetch(_) => "balance_fetch",
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create a connect error
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect(reason.into())
    }
}

/// Deterministic exponential backoff for connect retries
///
/// The delay before retry attempt `k` (0-indexed) is `base_delay * 2^k`.
/// No jitter: reconnect timing must be exactly reproducible under the
/// mocked clock used by the timing tests.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    base_delay_ms: u64,
}

impl ExponentialBackoff {
    /// Create a new backoff strategy from the base delay
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            current_attempt: 0,
            base_delay_ms,
        }
    }

    /// Get the next backoff duration and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        // Saturate instead of overflowing for absurd attempt counts
        let factor = 1u64.checked_shl(self.current_attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor);

        self.current_attempt += 1;

        Duration::from_millis(delay_ms)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}
