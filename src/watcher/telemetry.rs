//! Telemetry with atomic counters and snapshot export

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic metrics for zero-overhead tracking in the notification path
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    /// Raw notifications received from the transport
    pub notifications_seen: AtomicU64,
    /// Notifications dropped by the update throttle
    pub notifications_throttled: AtomicU64,
    /// Events delivered to the balance change callback
    pub events_delivered: AtomicU64,
    /// Failed connect / subscribe attempts
    pub connect_failures: AtomicU64,
    /// Established subscriptions lost
    pub disconnects: AtomicU64,
    /// Successful re-establishments after a disconnect
    pub reconnects: AtomicU64,
    /// Seed balance reads that failed
    pub balance_fetch_errors: AtomicU64,
    /// Consumer callbacks that panicked and were contained
    pub callback_panics: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub notifications_seen: u64,
    pub notifications_throttled: u64,
    pub events_delivered: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub balance_fetch_errors: u64,
    pub callback_panics: u64,
}

impl WatcherMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a consistent-enough snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_seen: self.notifications_seen.load(Ordering::Relaxed),
            notifications_throttled: self.notifications_throttled.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            balance_fetch_errors: self.balance_fetch_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }

    /// Export the snapshot as a JSON string for log lines and dashboards
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Reset all counters (useful for testing)
    pub fn reset(&self) {
        self.notifications_seen.store(0, Ordering::Relaxed);
        self.notifications_throttled.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.connect_failures.store(0, Ordering::Relaxed);
        self.disconnects.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.balance_fetch_errors.store(0, Ordering::Relaxed);
        self.callback_panics.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = WatcherMetrics::new();

        metrics.notifications_seen.fetch_add(3, Ordering::Relaxed);
        metrics.events_delivered.fetch_add(2, Ordering::Relaxed);
        metrics.notifications_throttled.fetch_add(1, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.notifications_seen, 3);
        assert_eq!(snap.events_delivered, 2);
        assert_eq!(snap.notifications_throttled, 1);
        assert_eq!(snap.reconnects, 0);
    }

    #[test]
    fn test_snapshot_json_is_valid() {
        let metrics = WatcherMetrics::new();
        metrics.reconnects.fetch_add(7, Ordering::Relaxed);

        let json = metrics.snapshot_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["reconnects"], 7);
        assert_eq!(value["events_delivered"], 0);
    }

    #[test]
    fn test_reset() {
        let metrics = WatcherMetrics::new();
        metrics.disconnects.fetch_add(5, Ordering::Relaxed);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot {
            notifications_seen: 0,
            notifications_throttled: 0,
            events_delivered: 0,
            connect_failures: 0,
            disconnects: 0,
            reconnects: 0,
            balance_fetch_errors: 0,
            callback_panics: 0,
        });
    }
}
