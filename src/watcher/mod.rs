// Watcher components
pub mod config; // MonitorConfig, Commitment, callback types, validation
pub mod errors; // WatcherError enum, retry policy (ExponentialBackoff)
pub mod events; // BalanceChangeEvent + lamport formatting
pub mod monitor; // Monitor lifecycle: connect/backoff loop, throttle, stop handles
pub mod telemetry; // Atomic counters, JSON snapshot export
pub mod transport; // AccountTransport seam: pubsub impl + in-memory mock

// Re-export commonly used types
pub use config::{
    BalanceChangeCallback, Commitment, ErrorCallback, MonitorConfig, ReconnectCallback,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
};
pub use errors::{ExponentialBackoff, WatcherError};
pub use events::{format_sol, format_sol_delta, BalanceChangeEvent, LAMPORTS_PER_SOL};
pub use monitor::{
    start_monitor, start_monitor_with_metrics, start_multi_monitor, MonitorState,
    MultiMonitorSettings, MultiStopHandle, StopHandle, UpdateThrottle,
};
pub use telemetry::{MetricsSnapshot, WatcherMetrics};
pub use transport::{
    AccountNotification, AccountSubscription, AccountTransport, MockTransport, PubsubTransport,
};
