//! Connectivity notifications.
//!
//! [`ConnectivityNotifier`] hands out a stream of `is-connected` booleans.
//! Dropping the receiver deregisters the subscription. [`ConnectivityMonitor`]
//! is a ready-made notifier the embedding application feeds from its platform
//! network callback; [`ConnectivityEdge`] turns the raw stream into
//! "connection restored" triggers.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

pub trait ConnectivityNotifier: Send + Sync {
    /// Subscribe to connectivity changes. The current state, if known, may be
    /// delivered immediately.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool>;
}

/// Fan-out notifier. Closed subscriptions are pruned on the next publish.
#[derive(Default)]
pub struct ConnectivityMonitor {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<bool>>>,
    current: Mutex<Option<bool>>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the platform's current connectivity to every subscriber.
    pub fn set_connected(&self, connected: bool) {
        let mut current = self.current.lock();
        *current = Some(connected);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(connected).is_ok());
        debug!(connected, subscribers = subscribers.len(), "connectivity published");
    }

    /// Last published state, `None` before the first publish.
    pub fn is_connected(&self) -> Option<bool> {
        *self.current.lock()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl ConnectivityNotifier for ConnectivityMonitor {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Lock order: current -> subscribers (matches set_connected).
        let current = self.current.lock();
        if let Some(connected) = *current {
            let _ = tx.send(connected);
        }
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Detects transitions into the connected state.
///
/// The first `true` after construction counts as a transition, so a process
/// that starts online flushes once straight away.
#[derive(Debug, Default)]
pub struct ConnectivityEdge {
    last: Option<bool>,
}

impl ConnectivityEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connected` and return `true` if it is a restoration.
    pub fn observe(&mut self, connected: bool) -> bool {
        let restored = connected && self.last != Some(true);
        self.last = Some(connected);
        restored
    }
}
