//! Connection status tracking.
//!
//! A client starts `Uninitialized` and becomes `Connected` or `Failed` when
//! it is built. Afterwards transports report every round-trip: a request
//! that never reached the server flips the status to `Disconnected`, a
//! rejected credential to `Failed`, and any answered request back to
//! `Connected`. Status is informational only; operations never consult it
//! and always surface the transport error themselves.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Lifecycle state of a store client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// The client has not finished connecting yet.
    Uninitialized,
    /// The last round-trip reached the server.
    Connected,
    /// The last request could not reach the server.
    Disconnected,
    /// Connecting failed, or the server rejected the credentials.
    Failed,
}

/// Shared, observable connection status.
///
/// Cloning is cheap; every clone publishes to the same channel.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionMonitor {
    /// Create a monitor in the `Uninitialized` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::Uninitialized);
        Self { tx: Arc::new(tx) }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    /// Move to `status`, logging the transition if it changes anything.
    pub fn set(&self, status: ConnectionStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            match status {
                ConnectionStatus::Connected => info!(from = ?*current, "Connection established"),
                ConnectionStatus::Disconnected | ConnectionStatus::Failed => {
                    warn!(from = ?*current, to = ?status, "Connection lost");
                }
                ConnectionStatus::Uninitialized => {}
            }
            *current = status;
            true
        });
    }

    /// Record a request that failed before the server answered.
    pub fn record_unreachable(&self, error: &reqwest::Error) {
        if error.is_connect() || error.is_timeout() {
            self.set(ConnectionStatus::Disconnected);
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
