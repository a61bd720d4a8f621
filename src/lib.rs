//! Real-time Solana account balance monitoring
//!
//! Subscribes to balance change notifications for one or more accounts over
//! a persistent connection, normalizes lamport deltas into SOL, and
//! transparently reconnects with exponential backoff when the transport
//! drops. Consumers receive events through optional callbacks; a stop
//! handle tears everything down.

pub mod config;
pub mod watcher;

// Re-export the primary API surface
pub use watcher::{
    start_monitor, start_multi_monitor, AccountTransport, BalanceChangeEvent, Commitment,
    MonitorConfig, MonitorState, MultiMonitorSettings, PubsubTransport, StopHandle, WatcherError,
};
