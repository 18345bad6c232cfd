//! Connection state and lifecycle notifications

use crate::error::ClientError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle channel depth; slow receivers see `Lagged` past this
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Notification raised on every state transition
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A connect sequence created its backend and is about to handshake
    Connecting,
    Connected,
    /// Construction or handshake failed; the client stays disconnected
    ConnectionFailed(Arc<ClientError>),
    /// Explicit disconnect completed
    Disconnected,
    /// The broker connection dropped without a disconnect request
    ConnectionLost,
}

impl LifecycleEvent {
    /// True for every event that leaves the client disconnected
    pub fn is_disconnection(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Disconnected
                | LifecycleEvent::ConnectionLost
                | LifecycleEvent::ConnectionFailed(_)
        )
    }
}

/// Broadcast sender wrapper; sending without receivers is not an error
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        debug!(event = ?event, receivers = self.tx.receiver_count(), "Lifecycle event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_disconnection() {
        assert!(!LifecycleEvent::Connecting.is_disconnection());
        assert!(!LifecycleEvent::Connected.is_disconnection());
        assert!(LifecycleEvent::Disconnected.is_disconnection());
        assert!(LifecycleEvent::ConnectionLost.is_disconnection());
        assert!(LifecycleEvent::ConnectionFailed(Arc::new(ClientError::UnexpectedClose))
            .is_disconnection());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }

    #[tokio::test]
    async fn test_every_receiver_sees_events_in_order() {
        let notifier = LifecycleNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.emit(LifecycleEvent::Connecting);
        notifier.emit(LifecycleEvent::Connected);
        notifier.emit(LifecycleEvent::ConnectionLost);

        for rx in [&mut first, &mut second] {
            assert!(matches!(rx.recv().await.unwrap(), LifecycleEvent::Connecting));
            assert!(matches!(rx.recv().await.unwrap(), LifecycleEvent::Connected));
            assert!(matches!(rx.recv().await.unwrap(), LifecycleEvent::ConnectionLost));
        }
    }

    #[test]
    fn test_emit_without_receivers() {
        let notifier = LifecycleNotifier::new();
        notifier.emit(LifecycleEvent::Disconnected);
    }
}
