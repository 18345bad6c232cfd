//! Mock implementations for testing
//!
//! Provides a mock broker backend and factory that record every call and let
//! tests inject inbound messages, connection loss and failures without a
//! running broker.

use crate::client::queue::EventSink;
use crate::config::BrokerSection;
use crate::protocol::{InboundMessage, QoS};
use crate::transport::{BackendError, BackendFactory, BrokerBackend, ConnectRequest};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Connect {
        client_id: String,
        username: Option<String>,
        password: Option<String>,
    },
    Disconnect,
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Subscribe(Vec<(String, QoS)>),
    Unsubscribe(Vec<String>),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BackendCall>,
    connected: bool,
    sink: Option<EventSink>,
    sink_registrations: usize,
    constructed: usize,
    construction_failure: Option<String>,
    handshake_failure: Option<String>,
    handshake_delay: Option<Duration>,
    fail_operations: bool,
    last_settings: Option<BrokerSection>,
}

/// Shared view of a mock backend, kept by tests after the backend is handed
/// to a client
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of handshakes attempted
    pub fn connect_attempts(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::Connect { .. }))
            .count()
    }

    pub fn publishes(&self) -> Vec<(String, Bytes)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Publish { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// True while a client has an event sink registered
    pub fn has_sink(&self) -> bool {
        self.state().sink.is_some()
    }

    pub fn sink_registrations(&self) -> usize {
        self.state().sink_registrations
    }

    /// Number of backends created by a [`MockFactory`] sharing this handle
    pub fn constructed(&self) -> usize {
        self.state().constructed
    }

    pub fn last_settings(&self) -> Option<BrokerSection> {
        self.state().last_settings.clone()
    }

    pub fn fail_construction(&self, reason: Option<&str>) {
        self.state().construction_failure = reason.map(str::to_string);
    }

    pub fn fail_handshake(&self, reason: Option<&str>) {
        self.state().handshake_failure = reason.map(str::to_string);
    }

    /// Make the handshake take `delay` of (tokio) time
    pub fn set_handshake_delay(&self, delay: Option<Duration>) {
        self.state().handshake_delay = delay;
    }

    /// Make publish/subscribe/unsubscribe/disconnect fail
    pub fn fail_operations(&self, fail: bool) {
        self.state().fail_operations = fail;
    }

    /// Deliver an inbound message through the registered sink, as the I/O
    /// context would
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let sink = self.state().sink.clone();
        match sink {
            Some(sink) => sink.on_message(InboundMessage::new(topic, payload)),
            None => false,
        }
    }

    /// Drop the connection from the broker side
    pub fn drop_connection(&self) {
        let sink = {
            let mut state = self.state();
            state.connected = false;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_connection_closed();
        }
    }
}

/// Mock backend recording every call into its [`MockHandle`]
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    handle: MockHandle,
}

impl MockBackend {
    pub fn new(handle: MockHandle) -> Self {
        Self { handle }
    }

    /// Backend that already considers itself connected
    pub fn connected() -> Self {
        let handle = MockHandle::new();
        handle.state().connected = true;
        Self { handle }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.handle.calls()
    }

    fn record_operation(&self, call: BackendCall) -> Result<(), BackendError> {
        let mut state = self.handle.state();
        state.calls.push(call);
        if !state.connected {
            return Err(BackendError::NotConnected);
        }
        if state.fail_operations {
            return Err(BackendError::Request("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerBackend for MockBackend {
    async fn connect(&mut self, request: &ConnectRequest) -> Result<(), BackendError> {
        let delay = {
            let mut state = self.handle.state();
            state.calls.push(BackendCall::Connect {
                client_id: request.client_id.clone(),
                username: request.username.clone(),
                password: request.password.clone(),
            });
            state.handshake_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.handle.state();
        if let Some(reason) = state.handshake_failure.clone() {
            return Err(BackendError::Handshake(reason));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        let mut state = self.handle.state();
        state.calls.push(BackendCall::Disconnect);
        state.connected = false;
        if state.fail_operations {
            return Err(BackendError::Request("injected failure".into()));
        }
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BackendError> {
        self.record_operation(BackendCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        })
    }

    fn subscribe(&mut self, filters: &[String], qos: &[QoS]) -> Result<(), BackendError> {
        let pairs = filters.iter().cloned().zip(qos.iter().copied()).collect();
        self.record_operation(BackendCall::Subscribe(pairs))
    }

    fn unsubscribe(&mut self, filters: &[String]) -> Result<(), BackendError> {
        self.record_operation(BackendCall::Unsubscribe(filters.to_vec()))
    }

    fn is_connected(&self) -> bool {
        self.handle.state().connected
    }

    fn set_event_sink(&mut self, sink: Option<EventSink>) {
        let mut state = self.handle.state();
        if sink.is_some() {
            state.sink_registrations += 1;
        }
        state.sink = sink;
    }
}

/// Factory producing [`MockBackend`]s that all share one handle
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    handle: MockHandle,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: MockHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl BackendFactory for MockFactory {
    fn create(&self, settings: &BrokerSection) -> Result<Box<dyn BrokerBackend>, BackendError> {
        let mut state = self.handle.state();
        state.last_settings = Some(settings.clone());
        if let Some(reason) = state.construction_failure.clone() {
            return Err(BackendError::Construction(reason));
        }
        state.constructed += 1;
        state.connected = false;
        drop(state);

        Ok(Box::new(MockBackend::new(self.handle.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            client_id: "test-client".to_string(),
            username: Some("user".to_string()),
            password: None,
            timeout: Duration::from_secs(1),
            keep_alive: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_mock_backend_records_calls() {
        let factory = MockFactory::new();
        let handle = factory.handle();
        let mut backend = factory.create(&BrokerSection::default()).unwrap();

        backend.connect(&request()).await.unwrap();
        backend.publish("a/b", Bytes::from_static(b"x"), QoS::AtLeastOnce, false).unwrap();
        backend.disconnect().unwrap();

        assert_eq!(handle.constructed(), 1);
        assert_eq!(handle.connect_attempts(), 1);
        assert_eq!(handle.publishes(), vec![("a/b".to_string(), Bytes::from_static(b"x"))]);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let handle = MockHandle::new();
        handle.fail_construction(Some("bad address"));
        let factory = MockFactory::with_handle(handle.clone());
        assert!(matches!(
            factory.create(&BrokerSection::default()),
            Err(BackendError::Construction(_))
        ));

        handle.fail_construction(None);
        handle.fail_handshake(Some("refused"));
        let mut backend = factory.create(&BrokerSection::default()).unwrap();
        assert!(matches!(
            backend.connect(&request()).await,
            Err(BackendError::Handshake(_))
        ));
        assert!(matches!(
            backend.subscribe(&["x".to_string()], &[QoS::AtMostOnce]),
            Err(BackendError::NotConnected)
        ));
    }

    #[test]
    fn test_deliver_without_sink_is_rejected() {
        let handle = MockHandle::new();
        assert!(!handle.deliver("a", "payload"));
    }
}
