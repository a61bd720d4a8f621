//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use account_monitor::watcher::{
    BalanceChangeCallback, BalanceChangeEvent, ErrorCallback, ReconnectCallback, WatcherError,
};

/// Deterministic, syntactically valid base58 account address
pub fn test_address(seed: u8) -> String {
    bs58::encode([seed; 32]).into_string()
}

/// Let spawned monitor tasks run without advancing the mock clock
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Records every delivered balance change event
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<BalanceChangeEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> BalanceChangeCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &BalanceChangeEvent| {
            events.lock().push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<BalanceChangeEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

/// Records the category of every reported error
#[derive(Clone, Default)]
pub struct ErrorRecorder {
    categories: Arc<Mutex<Vec<&'static str>>>,
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> ErrorCallback {
        let categories = Arc::clone(&self.categories);
        Arc::new(move |error: &WatcherError| {
            categories.lock().push(error.category());
        })
    }

    pub fn categories(&self) -> Vec<&'static str> {
        self.categories.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.categories.lock().len()
    }

    pub fn count_of(&self, category: &str) -> usize {
        self.categories
            .lock()
            .iter()
            .filter(|c| **c == category)
            .count()
    }
}

/// Counts reconnect callback invocations
#[derive(Clone, Default)]
pub struct ReconnectCounter {
    count: Arc<AtomicU64>,
}

impl ReconnectCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> ReconnectCallback {
        let count = Arc::clone(&self.count);
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}
