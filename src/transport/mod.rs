//! Transport layer: the capability surface of the underlying broker client
//!
//! The client core never talks MQTT itself. It drives a [`BrokerBackend`]
//! created by a [`BackendFactory`], which keeps protocol details, TLS and the
//! network I/O context out of the control loop and lets tests substitute a mock.

use crate::client::queue::EventSink;
use crate::config::BrokerSection;
use crate::protocol::QoS;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Parameters for a single handshake attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Unique client identifier, regenerated for every attempt
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upper bound for the handshake
    pub timeout: Duration,
    pub keep_alive: Duration,
}

/// Errors reported by a broker backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Client construction failed: {0}")]
    Construction(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Request failed")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Underlying broker client
///
/// `connect` may suspend for at most `request.timeout`. All other operations
/// only queue work for the I/O context and return immediately. Inbound
/// messages and unexpected connection loss are reported through the sink
/// installed with [`BrokerBackend::set_event_sink`], possibly from another thread.
#[async_trait::async_trait]
pub trait BrokerBackend: Send {
    /// Perform the handshake
    async fn connect(&mut self, request: &ConnectRequest) -> Result<(), BackendError>;

    /// Request a clean disconnect
    fn disconnect(&mut self) -> Result<(), BackendError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BackendError>;

    /// Subscribe to `filters[i]` with `qos[i]`
    fn subscribe(&mut self, filters: &[String], qos: &[QoS]) -> Result<(), BackendError>;

    fn unsubscribe(&mut self, filters: &[String]) -> Result<(), BackendError>;

    fn is_connected(&self) -> bool;

    /// Register (`Some`) or deregister (`None`) the inbound-message and
    /// connection-closed callbacks
    fn set_event_sink(&mut self, sink: Option<EventSink>);
}

/// Creates backend instances from the broker settings
pub trait BackendFactory: Send + Sync {
    /// Instantiate a backend; failure is a construction error
    fn create(&self, settings: &BrokerSection) -> Result<Box<dyn BrokerBackend>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let errors = vec![
            BackendError::Construction("bad address".to_string()),
            BackendError::Handshake("refused".to_string()),
            BackendError::Timeout(Duration::from_millis(10)),
            BackendError::NotConnected,
            BackendError::Request("queue full".to_string().into()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_request_error_keeps_source() {
        use std::error::Error;

        let error = BackendError::Request("queue full".to_string().into());
        assert_eq!(error.source().map(|e| e.to_string()).as_deref(), Some("queue full"));
    }
}
