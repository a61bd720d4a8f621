//! Account monitor lifecycle: subscribe, throttle, reconnect, stop
//!
//! One lightweight task per monitored account. The task owns all per-account
//! state (baseline balance, throttle window), so no locking is needed and
//! callbacks for a single account are strictly ordered.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{BalanceChangeCallback, Commitment, MonitorConfig};
use super::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use super::errors::{ExponentialBackoff, WatcherError};
use super::events::BalanceChangeEvent;
use super::telemetry::WatcherMetrics;
use super::transport::{AccountNotification, AccountSubscription, AccountTransport};

/// Monitor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    /// Establishing the initial subscription
    Connecting = 0,
    /// Subscription live, notifications flowing
    Subscribed = 1,
    /// Subscription lost, re-establishing
    Reconnecting = 2,
    /// Connect retries exhausted; a new monitor must be started
    Failed = 3,
    /// Stopped via the handle (terminal)
    Stopped = 4,
}

impl From<u8> for MonitorState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Subscribed,
            2 => Self::Reconnecting,
            4 => Self::Stopped,
            _ => Self::Failed,
        }
    }
}

/// Rate limiter that delivers the first update in each window and drops the
/// rest until the window elapses
///
/// Dropped updates leave the window anchor untouched, so the admitted
/// sequence is exactly the greedy subsequence spaced at least one window
/// apart. A zero window admits everything.
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    window: Duration,
    last_delivery: Option<Instant>,
}

impl UpdateThrottle {
    /// Create a throttle with the given minimum spacing
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_delivery: None,
        }
    }

    /// Decide whether an update arriving at `now` is delivered
    pub fn admit(&mut self, now: Instant) -> bool {
        if !self.window.is_zero() {
            if let Some(last) = self.last_delivery {
                if now.duration_since(last) < self.window {
                    return false;
                }
            }
        }
        self.last_delivery = Some(now);
        true
    }
}

/// Per-account tracking state, owned by the monitor task
struct WatchedAccount {
    address: String,
    last_balance: Option<u64>,
    throttle: UpdateThrottle,
}

/// State shared between the monitor task and its [`StopHandle`]
struct MonitorShared {
    state: AtomicU8,
    stopping: AtomicBool,
    stop_notify: Notify,
    metrics: Arc<WatcherMetrics>,
}

impl MonitorShared {
    fn new(metrics: Arc<WatcherMetrics>) -> Self {
        Self {
            state: AtomicU8::new(MonitorState::Connecting as u8),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            metrics,
        }
    }

    fn state(&self) -> MonitorState {
        MonitorState::from(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, new_state: MonitorState) {
        // Once a stop is requested the state is pinned to Stopped
        if self.stop_requested() && new_state != MonitorState::Stopped {
            return;
        }
        self.state.store(new_state as u8, Ordering::Release);
        debug!("monitor state changed to {:?}", new_state);
    }

    fn stop_requested(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Handle that stops a running monitor
///
/// Stopping cancels pending backoff timers, tears down the live
/// subscription, and suppresses every callback from that point on, including
/// from an in-flight reconnect. Repeated calls have no additional effect.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<MonitorShared>,
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl StopHandle {
    /// Request the monitor to stop; idempotent
    pub fn stop(&self) {
        if !self.shared.stopping.swap(true, Ordering::SeqCst) {
            self.shared.set_state(MonitorState::Stopped);
            self.shared.stop_notify.notify_one();
            debug!("monitor stop requested");
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> MonitorState {
        self.shared.state()
    }

    /// Whether the monitor has been stopped via this handle
    pub fn is_stopped(&self) -> bool {
        self.shared.state() == MonitorState::Stopped
    }

    /// Telemetry counters for this monitor
    pub fn metrics(&self) -> Arc<WatcherMetrics> {
        Arc::clone(&self.shared.metrics)
    }
}

/// Start a monitor for one account
///
/// Validates the configuration synchronously; only validation errors are
/// returned to the caller. Every failure after this point is funneled
/// through the configured error callback, never thrown from the background
/// task. Must be called from within a tokio runtime.
pub fn start_monitor(
    transport: Arc<dyn AccountTransport>,
    config: MonitorConfig,
) -> Result<StopHandle, WatcherError> {
    start_monitor_with_metrics(transport, config, Arc::new(WatcherMetrics::new()))
}

/// Start a monitor that records into an externally owned metrics instance
pub fn start_monitor_with_metrics(
    transport: Arc<dyn AccountTransport>,
    config: MonitorConfig,
    metrics: Arc<WatcherMetrics>,
) -> Result<StopHandle, WatcherError> {
    config.validate()?;

    let shared = Arc::new(MonitorShared::new(metrics));
    let handle = StopHandle {
        shared: Arc::clone(&shared),
    };

    info!(
        account = %config.account_address,
        commitment = %config.commitment,
        update_interval_ms = config.update_interval_ms,
        "starting account monitor"
    );
    tokio::spawn(run_monitor(transport, config, shared));

    Ok(handle)
}

/// Settings shared by every monitor of a multi-account start
#[derive(Debug, Clone)]
pub struct MultiMonitorSettings {
    /// Minimum time between delivered callbacks per account, 0 = unthrottled
    pub update_interval_ms: u64,
    /// Bounded reconnect attempts per connect cycle
    pub max_retries: u32,
    /// Base backoff unit between reconnect attempts
    pub retry_delay_ms: u64,
}

impl Default for MultiMonitorSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Aggregated handle over independently started monitors
pub struct MultiStopHandle {
    handles: Vec<(String, StopHandle)>,
    failures: Vec<(String, WatcherError)>,
    metrics: Arc<WatcherMetrics>,
}

impl MultiStopHandle {
    /// Stop every monitor that was started
    pub fn stop_all(&self) {
        for (_, handle) in &self.handles {
            handle.stop();
        }
    }

    /// Number of monitors running
    pub fn started(&self) -> usize {
        self.handles.len()
    }

    /// Accounts whose monitor failed to start, with the rejection reason
    pub fn failures(&self) -> &[(String, WatcherError)] {
        &self.failures
    }

    /// Per-account handles
    pub fn handles(&self) -> &[(String, StopHandle)] {
        &self.handles
    }

    /// Telemetry counters aggregated across all monitors
    pub fn metrics(&self) -> Arc<WatcherMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Start one independent monitor per account with a shared commitment level
///
/// Best-effort fan-out: an account that fails validation is recorded in the
/// returned handle's failure list and does not prevent the others from
/// starting.
pub fn start_multi_monitor(
    transport: Arc<dyn AccountTransport>,
    rpc_endpoint: &str,
    ws_endpoint: &str,
    accounts: HashMap<String, BalanceChangeCallback>,
    commitment: Commitment,
    settings: MultiMonitorSettings,
) -> MultiStopHandle {
    let metrics = Arc::new(WatcherMetrics::new());
    let mut handles = Vec::new();
    let mut failures = Vec::new();

    for (address, callback) in accounts {
        let config = MonitorConfig::new(address.clone(), rpc_endpoint, ws_endpoint)
            .with_commitment(commitment)
            .with_update_interval_ms(settings.update_interval_ms)
            .with_max_retries(settings.max_retries)
            .with_retry_delay_ms(settings.retry_delay_ms)
            .on_balance_change(callback);

        match start_monitor_with_metrics(Arc::clone(&transport), config, Arc::clone(&metrics)) {
            Ok(handle) => handles.push((address, handle)),
            Err(e) => {
                warn!(account = %address, error = %e, "monitor failed to start");
                failures.push((address, e));
            }
        }
    }

    info!(
        started = handles.len(),
        failed = failures.len(),
        "multi-account monitor started"
    );

    MultiStopHandle {
        handles,
        failures,
        metrics,
    }
}

/// Run a consumer callback, containing panics
///
/// A consumer bug must not stop balance tracking; the panic is counted and
/// logged, nothing else. No callback runs once a stop was requested.
fn run_callback(shared: &MonitorShared, account: &str, kind: &str, f: impl FnOnce()) {
    if shared.stop_requested() {
        return;
    }
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        shared.metrics.callback_panics.fetch_add(1, Ordering::Relaxed);
        error!(
            account = %account,
            callback = kind,
            "consumer callback panicked; monitor continues"
        );
    }
}

fn report_error(config: &MonitorConfig, shared: &MonitorShared, account: &str, err: &WatcherError) {
    if let Some(cb) = &config.on_error {
        run_callback(shared, account, "on_error", || cb(err));
    }
}

/// Sleep for `delay`, returning early with `false` if a stop arrives
async fn sleep_unless_stopped(shared: &MonitorShared, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shared.stop_notify.notified() => false,
        _ = tokio::time::sleep(delay) => !shared.stop_requested(),
    }
}

enum ConnectOutcome {
    Subscribed(AccountSubscription),
    Stopped,
    Exhausted(WatcherError),
}

/// Establish the subscription with bounded exponential backoff
///
/// `max_retries = N` yields exactly `N + 1` attempts; the delay before retry
/// `k` (0-indexed) is `retry_delay_ms * 2^k`. Every failed attempt is
/// reported through the error callback; exhaustion is reported once more by
/// the caller as the terminal error.
async fn connect_with_backoff(
    transport: &dyn AccountTransport,
    config: &MonitorConfig,
    shared: &MonitorShared,
    account: &str,
) -> ConnectOutcome {
    let mut backoff = ExponentialBackoff::new(config.retry_delay_ms);
    let total_attempts = config.max_retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=total_attempts {
        if shared.stop_requested() {
            return ConnectOutcome::Stopped;
        }

        match transport.account_subscribe(account, config.commitment).await {
            Ok(subscription) => {
                info!(account = %account, attempt, "subscription established");
                return ConnectOutcome::Subscribed(subscription);
            }
            Err(e) => {
                shared.metrics.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!(account = %account, attempt, error = %e, "subscribe attempt failed");
                report_error(config, shared, account, &e);
                last_error = e.to_string();

                if shared.stop_requested() {
                    return ConnectOutcome::Stopped;
                }
                if attempt < total_attempts {
                    let delay = backoff.next_delay();
                    debug!(account = %account, ?delay, "backing off before retry");
                    if !sleep_unless_stopped(shared, delay).await {
                        return ConnectOutcome::Stopped;
                    }
                }
            }
        }
    }

    ConnectOutcome::Exhausted(WatcherError::RetriesExhausted {
        attempts: total_attempts,
        last_error,
    })
}

fn handle_notification(
    config: &MonitorConfig,
    shared: &MonitorShared,
    account: &mut WatchedAccount,
    notification: AccountNotification,
) {
    shared
        .metrics
        .notifications_seen
        .fetch_add(1, Ordering::Relaxed);

    let now = Instant::now();
    if !account.throttle.admit(now) {
        // Inside the window: drop without touching the baseline, so the
        // next delivered delta is computed against the last delivered
        // balance, not this one
        shared
            .metrics
            .notifications_throttled
            .fetch_add(1, Ordering::Relaxed);
        return;
    }

    let delta = match account.last_balance {
        Some(previous) => notification.lamports as i64 - previous as i64,
        None => 0,
    };
    let event = BalanceChangeEvent::new(
        &account.address,
        notification.slot,
        notification.lamports,
        delta,
    );

    debug!(
        account = %account.address,
        slot = notification.slot,
        balance = %event.formatted_balance,
        delta = %event.formatted_delta,
        "balance change"
    );

    if let Some(cb) = &config.on_balance_change {
        run_callback(shared, &account.address, "on_balance_change", || cb(&event));
    }

    account.last_balance = Some(notification.lamports);
    shared
        .metrics
        .events_delivered
        .fetch_add(1, Ordering::Relaxed);
}

async fn run_monitor(
    transport: Arc<dyn AccountTransport>,
    config: MonitorConfig,
    shared: Arc<MonitorShared>,
) {
    let mut account = WatchedAccount {
        address: config.account_address.clone(),
        last_balance: None,
        throttle: UpdateThrottle::new(config.update_interval()),
    };

    // Seed the baseline so the first delta is not reported against an
    // unknown starting point; best-effort, a failure is reported and the
    // monitor carries on with an unset baseline
    match transport
        .account_balance(&account.address, config.commitment)
        .await
    {
        Ok(Some(lamports)) => {
            debug!(account = %account.address, lamports, "seeded baseline balance");
            account.last_balance = Some(lamports);
        }
        Ok(None) => {
            debug!(account = %account.address, "account not found, baseline unset");
        }
        Err(e) => {
            shared
                .metrics
                .balance_fetch_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(account = %account.address, error = %e, "seed balance fetch failed");
            report_error(&config, &shared, &account.address, &e);
        }
    }
    if shared.stop_requested() {
        return;
    }

    let mut reconnecting = false;
    loop {
        shared.set_state(if reconnecting {
            MonitorState::Reconnecting
        } else {
            MonitorState::Connecting
        });

        let mut subscription =
            match connect_with_backoff(&*transport, &config, &shared, &account.address).await {
                ConnectOutcome::Subscribed(subscription) => subscription,
                ConnectOutcome::Stopped => return,
                ConnectOutcome::Exhausted(err) => {
                    error!(account = %account.address, error = %err, "monitor giving up");
                    report_error(&config, &shared, &account.address, &err);
                    shared.set_state(MonitorState::Failed);
                    return;
                }
            };

        if reconnecting {
            shared.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(account = %account.address, "subscription re-established");
            // Fires right after resubscription succeeds, possibly before
            // the first post-reconnect notification lands
            if let Some(cb) = &config.on_reconnect {
                run_callback(&shared, &account.address, "on_reconnect", || cb());
            }
        }
        shared.set_state(MonitorState::Subscribed);

        loop {
            tokio::select! {
                biased;
                _ = shared.stop_notify.notified() => {
                    subscription.close();
                    return;
                }
                notification = subscription.next() => match notification {
                    Some(notification) => {
                        handle_notification(&config, &shared, &mut account, notification);
                    }
                    None => {
                        if shared.stop_requested() {
                            subscription.close();
                            return;
                        }
                        shared.metrics.disconnects.fetch_add(1, Ordering::Relaxed);
                        warn!(account = %account.address, "subscription lost");
                        let err = WatcherError::Disconnect("notification stream ended".to_string());
                        report_error(&config, &shared, &account.address, &err);

                        // Drop the stale handle before re-entering the
                        // connect cycle
                        subscription.close();
                        drop(subscription);

                        if !sleep_unless_stopped(
                            &shared,
                            Duration::from_millis(config.retry_delay_ms),
                        )
                        .await
                        {
                            return;
                        }
                        reconnecting = true;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::transport::MockTransport;

    fn test_address() -> String {
        bs58::encode([9u8; 32]).into_string()
    }

    #[test]
    fn test_state_conversion() {
        assert_eq!(MonitorState::from(0), MonitorState::Connecting);
        assert_eq!(MonitorState::from(1), MonitorState::Subscribed);
        assert_eq!(MonitorState::from(2), MonitorState::Reconnecting);
        assert_eq!(MonitorState::from(4), MonitorState::Stopped);
        assert_eq!(MonitorState::from(42), MonitorState::Failed);
    }

    #[test]
    fn test_throttle_zero_window_admits_everything() {
        let mut throttle = UpdateThrottle::new(Duration::ZERO);
        let base = Instant::now();

        for i in 0..10 {
            assert!(throttle.admit(base + Duration::from_millis(i)));
        }
    }

    #[test]
    fn test_throttle_drops_inside_window() {
        let mut throttle = UpdateThrottle::new(Duration::from_secs(60));
        let base = Instant::now();

        assert!(throttle.admit(base));
        assert!(!throttle.admit(base + Duration::from_secs(30)));
        assert!(!throttle.admit(base + Duration::from_secs(59)));
        assert!(throttle.admit(base + Duration::from_secs(60)));
        // Anchor moved to t=60, not to the dropped updates
        assert!(!throttle.admit(base + Duration::from_secs(119)));
        assert!(throttle.admit(base + Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_start_monitor_rejects_invalid_address() {
        let transport = Arc::new(MockTransport::new());
        let config = MonitorConfig::new("!!!", "http://x", "ws://x");

        let err = start_monitor(transport, config).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn test_start_monitor_rejects_missing_endpoint() {
        let transport = Arc::new(MockTransport::new());
        let config = MonitorConfig::new(test_address(), "", "ws://x");

        assert!(start_monitor(transport, config).is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let config = MonitorConfig::new(test_address(), "http://x", "ws://x");

        let handle = start_monitor(transport, config).unwrap();
        handle.stop();
        handle.stop();

        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_multi_monitor_partial_failure() {
        let transport: Arc<dyn AccountTransport> = Arc::new(MockTransport::new());
        let mut accounts: HashMap<String, BalanceChangeCallback> = HashMap::new();
        accounts.insert(test_address(), Arc::new(|_| {}));
        accounts.insert("bogus".to_string(), Arc::new(|_| {}));

        let handle = start_multi_monitor(
            transport,
            "http://x",
            "ws://x",
            accounts,
            Commitment::Confirmed,
            MultiMonitorSettings::default(),
        );

        assert_eq!(handle.started(), 1);
        assert_eq!(handle.failures().len(), 1);
        assert_eq!(handle.failures()[0].0, "bogus");

        handle.stop_all();
    }
}
