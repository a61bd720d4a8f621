//! Transport seam for balance reads and push subscriptions
//!
//! The monitor never talks to a concrete RPC provider directly; it receives
//! an [`AccountTransport`] by dependency injection. [`PubsubTransport`] is
//! the production implementation over Solana JSON-RPC / WebSocket,
//! [`MockTransport`] is the in-memory implementation used by tests.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::config::Commitment;
use super::errors::WatcherError;

/// Raw balance notification as delivered by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountNotification {
    /// Slot the observed state belongs to
    pub slot: u64,
    /// Absolute balance in lamports
    pub lamports: u64,
}

/// Live subscription to one account's balance notifications
///
/// Notifications arrive in transport order. The stream ending (`next`
/// returning `None`) is the disconnect signal. Dropping the subscription
/// releases it; [`AccountSubscription::close`] does so explicitly and is
/// idempotent.
pub struct AccountSubscription {
    notifications: mpsc::UnboundedReceiver<AccountNotification>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl AccountSubscription {
    /// Assemble a subscription from its channel halves
    pub fn new(
        notifications: mpsc::UnboundedReceiver<AccountNotification>,
        close_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            notifications,
            close_tx: Some(close_tx),
        }
    }

    /// Receive the next notification; `None` means the connection dropped
    pub async fn next(&mut self) -> Option<AccountNotification> {
        self.notifications.recv().await
    }

    /// Release the subscription; further calls are no-ops
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for AccountSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Streaming transport the monitor runs against
#[async_trait]
pub trait AccountTransport: Send + Sync + 'static {
    /// Point-in-time balance read; `Ok(None)` means the account does not exist
    async fn account_balance(
        &self,
        address: &str,
        commitment: Commitment,
    ) -> Result<Option<u64>, WatcherError>;

    /// Open a push subscription for the account's balance changes
    async fn account_subscribe(
        &self,
        address: &str,
        commitment: Commitment,
    ) -> Result<AccountSubscription, WatcherError>;
}

impl From<Commitment> for CommitmentConfig {
    fn from(commitment: Commitment) -> Self {
        match commitment {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// Production transport over Solana JSON-RPC and the pubsub WebSocket API
///
/// Each subscription opens its own WebSocket connection, owned by a spawned
/// forwarding task, so independent monitors never share connection state.
pub struct PubsubTransport {
    rpc: RpcClient,
    ws_endpoint: String,
}

impl PubsubTransport {
    /// Create a transport from the HTTP and WebSocket endpoints
    pub fn new(rpc_endpoint: impl Into<String>, ws_endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(rpc_endpoint.into()),
            ws_endpoint: ws_endpoint.into(),
        }
    }
}

#[async_trait]
impl AccountTransport for PubsubTransport {
    async fn account_balance(
        &self,
        address: &str,
        commitment: Commitment,
    ) -> Result<Option<u64>, WatcherError> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|e| WatcherError::BalanceFetch(format!("invalid pubkey '{address}': {e}")))?;

        let response = self
            .rpc
            .get_account_with_commitment(&pubkey, commitment.into())
            .await
            .map_err(|e| WatcherError::BalanceFetch(e.to_string()))?;

        Ok(response.value.map(|account| account.lamports))
    }

    async fn account_subscribe(
        &self,
        address: &str,
        commitment: Commitment,
    ) -> Result<AccountSubscription, WatcherError> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|e| WatcherError::connect(format!("invalid pubkey '{address}': {e}")))?;

        debug!(ws = %self.ws_endpoint, account = %address, "opening pubsub connection");
        let client = PubsubClient::new(&self.ws_endpoint)
            .await
            .map_err(|e| WatcherError::connect(format!("pubsub connect failed: {e}")))?;

        let config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            data_slice: None,
            commitment: Some(commitment.into()),
            min_context_slot: None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let account = address.to_string();

        // The subscription stream borrows the client, so both live inside
        // the forwarding task; the handshake result comes back over a
        // oneshot so setup failures surface as connect errors, not as an
        // instant disconnect.
        tokio::spawn(async move {
            let (mut notifications, unsubscribe) =
                match client.account_subscribe(&pubkey, Some(config)).await {
                    Ok(subscription) => {
                        let _ = ready_tx.send(Ok(()));
                        subscription
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

            let mut close_rx = close_rx;
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        debug!(account = %account, "subscription closed by monitor");
                        break;
                    }
                    next = notifications.next() => match next {
                        Some(response) => {
                            let notification = AccountNotification {
                                slot: response.context.slot,
                                lamports: response.value.lamports,
                            };
                            if tx.send(notification).is_err() {
                                warn!(account = %account, "notification receiver dropped");
                                break;
                            }
                        }
                        None => {
                            warn!(account = %account, "pubsub stream ended");
                            break;
                        }
                    }
                }
            }

            unsubscribe().await;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(AccountSubscription::new(rx, close_tx)),
            Ok(Err(msg)) => Err(WatcherError::connect(format!(
                "account subscribe failed: {msg}"
            ))),
            Err(_) => {
                error!(account = %address, "subscription task dropped during setup");
                Err(WatcherError::connect("subscription task aborted"))
            }
        }
    }
}

#[derive(Default)]
struct MockInner {
    balance: Option<u64>,
    fail_balance: bool,
    connect_failures_remaining: u64,
    connect_attempts: Vec<tokio::time::Instant>,
    active: HashMap<String, mpsc::UnboundedSender<AccountNotification>>,
}

/// In-memory transport for tests and development
///
/// Scripted connect failures, pushable notifications, and explicit
/// disconnects make the monitor's retry and throttle behavior fully
/// deterministic under a mocked clock.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
    closed_subscriptions: Arc<AtomicU64>,
}

impl MockTransport {
    /// Create a mock with no balance and no scripted failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance returned by point-in-time reads
    pub fn set_balance(&self, balance: Option<u64>) {
        self.inner.lock().balance = balance;
    }

    /// Make point-in-time reads fail
    pub fn fail_balance_fetches(&self, fail: bool) {
        self.inner.lock().fail_balance = fail;
    }

    /// Fail the next `n` subscribe attempts
    pub fn fail_next_connects(&self, n: u64) {
        self.inner.lock().connect_failures_remaining = n;
    }

    /// Fail every subscribe attempt until reconfigured
    pub fn fail_all_connects(&self) {
        self.inner.lock().connect_failures_remaining = u64::MAX;
    }

    /// Instants (mock clock) at which subscribe attempts arrived
    pub fn connect_attempts(&self) -> Vec<tokio::time::Instant> {
        self.inner.lock().connect_attempts.clone()
    }

    /// Number of subscribe attempts seen so far
    pub fn connect_attempt_count(&self) -> usize {
        self.inner.lock().connect_attempts.len()
    }

    /// Push a notification into the account's live subscription
    ///
    /// Returns `false` if no subscription is live for the account.
    pub fn push(&self, address: &str, slot: u64, lamports: u64) -> bool {
        let inner = self.inner.lock();
        match inner.active.get(address) {
            Some(tx) => tx.send(AccountNotification { slot, lamports }).is_ok(),
            None => false,
        }
    }

    /// Drop the account's live subscription, simulating a transport disconnect
    pub fn disconnect(&self, address: &str) {
        self.inner.lock().active.remove(address);
    }

    /// Whether a live subscription exists for the account
    pub fn has_active_subscription(&self, address: &str) -> bool {
        self.inner.lock().active.contains_key(address)
    }

    /// How many subscriptions have been released (closed or dropped)
    pub fn closed_subscriptions(&self) -> u64 {
        self.closed_subscriptions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountTransport for MockTransport {
    async fn account_balance(
        &self,
        _address: &str,
        _commitment: Commitment,
    ) -> Result<Option<u64>, WatcherError> {
        let inner = self.inner.lock();
        if inner.fail_balance {
            return Err(WatcherError::BalanceFetch("mock balance failure".to_string()));
        }
        Ok(inner.balance)
    }

    async fn account_subscribe(
        &self,
        address: &str,
        _commitment: Commitment,
    ) -> Result<AccountSubscription, WatcherError> {
        let mut inner = self.inner.lock();
        inner.connect_attempts.push(tokio::time::Instant::now());

        if inner.connect_failures_remaining > 0 {
            if inner.connect_failures_remaining != u64::MAX {
                inner.connect_failures_remaining -= 1;
            }
            return Err(WatcherError::connect("mock connect failure"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        inner.active.insert(address.to_string(), tx);

        let closed = Arc::clone(&self.closed_subscriptions);
        tokio::spawn(async move {
            // Completes on explicit close and on drop alike
            let _ = close_rx.await;
            closed.fetch_add(1, Ordering::Relaxed);
        });

        Ok(AccountSubscription::new(rx, close_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_push_and_receive() {
        let transport = MockTransport::new();
        let mut sub = transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .unwrap();

        assert!(transport.push("acct", 10, 500));
        let notification = sub.next().await.unwrap();
        assert_eq!(notification.slot, 10);
        assert_eq!(notification.lamports, 500);
    }

    #[tokio::test]
    async fn test_mock_disconnect_ends_stream() {
        let transport = MockTransport::new();
        let mut sub = transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .unwrap();

        transport.disconnect("acct");
        assert!(sub.next().await.is_none());
        assert!(!transport.push("acct", 1, 1));
    }

    #[tokio::test]
    async fn test_mock_scripted_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert!(transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .is_err());
        assert!(transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .is_err());
        assert!(transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .is_ok());
        assert_eq!(transport.connect_attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_subscription_close_is_idempotent() {
        let transport = MockTransport::new();
        let mut sub = transport
            .account_subscribe("acct", Commitment::Confirmed)
            .await
            .unwrap();

        sub.close();
        sub.close();
        drop(sub);

        // Give the close watcher task a chance to run
        tokio::task::yield_now().await;
        assert_eq!(transport.closed_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_mock_balance_read() {
        let transport = MockTransport::new();
        assert_eq!(
            transport
                .account_balance("acct", Commitment::Confirmed)
                .await
                .unwrap(),
            None
        );

        transport.set_balance(Some(1_000));
        assert_eq!(
            transport
                .account_balance("acct", Commitment::Confirmed)
                .await
                .unwrap(),
            Some(1_000)
        );

        transport.fail_balance_fetches(true);
        assert!(transport
            .account_balance("acct", Commitment::Confirmed)
            .await
            .is_err());
    }
}
