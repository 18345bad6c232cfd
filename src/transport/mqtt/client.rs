//! Impure I/O operations for the rumqttc backend
//!
//! Owns two tasks per connection. The event-loop task is the I/O context: it
//! forwards inbound publishes and unexpected connection loss to the
//! registered event sink, and never reconnects on its own. The forwarding
//! task feeds outbound requests to the rumqttc `AsyncClient` in order,
//! waiting whenever its bounded request channel is full, so the control loop
//! can queue any number of requests without blocking or losing them.

use super::connection::{configure_mqtt_options, to_mqtt_qos, validate_endpoint};
use super::message_handler::{EventRoute, MessageHandler};
use crate::client::queue::EventSink;
use crate::config::BrokerSection;
use crate::protocol::QoS;
use crate::transport::{BackendError, BackendFactory, BrokerBackend, ConnectRequest};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Request queued by the control loop for the forwarding task
#[derive(Debug, Clone, PartialEq)]
enum Outbound {
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        filter: String,
        qos: QoS,
    },
    Unsubscribe {
        filter: String,
    },
    Disconnect,
}

/// Handshake progress reported by the event-loop task
#[derive(Debug, Clone, PartialEq)]
enum LinkState {
    Connecting,
    Connected,
    Failed(String),
}

type SinkSlot = Arc<Mutex<Option<EventSink>>>;

/// Creates [`RumqttcBackend`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcFactory;

impl BackendFactory for RumqttcFactory {
    fn create(&self, settings: &BrokerSection) -> Result<Box<dyn BrokerBackend>, BackendError> {
        validate_endpoint(settings)?;
        Ok(Box::new(RumqttcBackend::new(settings.clone())))
    }
}

/// Broker backend driving a rumqttc v5 client
pub struct RumqttcBackend {
    settings: BrokerSection,
    outbound_tx: Option<mpsc::UnboundedSender<Outbound>>,
    connected: Arc<AtomicBool>,
    sink: SinkSlot,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
    forwarder_handle: Option<JoinHandle<()>>,
}

impl RumqttcBackend {
    pub fn new(settings: BrokerSection) -> Self {
        Self {
            settings,
            outbound_tx: None,
            connected: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(Mutex::new(None)),
            shutdown_tx: None,
            event_loop_handle: None,
            forwarder_handle: None,
        }
    }

    /// Hand a request to the forwarding task
    fn enqueue(&self, request: Outbound) -> Result<(), BackendError> {
        match &self.outbound_tx {
            Some(outbound_tx) if self.connected.load(Ordering::Acquire) => outbound_tx
                .send(request)
                .map_err(|_| BackendError::NotConnected),
            _ => Err(BackendError::NotConnected),
        }
    }

    /// Stop a running event-loop task, if any
    fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.forwarder_handle.take() {
            handle.abort();
        }
        self.outbound_tx = None;
        self.connected.store(false, Ordering::Release);
    }

    /// Feed queued requests to rumqttc one at a time, in order
    ///
    /// Ends after forwarding a disconnect, when every sender is gone, or when
    /// the event loop has stopped.
    async fn forward_requests(client: AsyncClient, mut requests: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(request) = requests.recv().await {
            let last = request == Outbound::Disconnect;
            let result = match request {
                Outbound::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                } => client.publish(topic, to_mqtt_qos(qos), retain, payload).await,
                Outbound::Subscribe { filter, qos } => client.subscribe(filter, to_mqtt_qos(qos)).await,
                Outbound::Unsubscribe { filter } => client.unsubscribe(filter).await,
                Outbound::Disconnect => client.disconnect().await,
            };

            if let Err(e) = result {
                warn!(target: "mqtt_transport", error = %e, "Event loop gone, dropping queued requests");
                break;
            }
            if last {
                break;
            }
        }
        debug!(target: "mqtt_transport", "Request forwarder stopped");
    }

    /// Wait for the event-loop task to report the ConnAck, bounded by `timeout`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    LinkState::Connected => return Ok(()),
                    LinkState::Failed(reason) => return Err(BackendError::Handshake(reason)),
                    LinkState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(BackendError::Handshake(
                        "event loop stopped before ConnAck".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }

    /// Poll the event loop until shutdown, disconnect or a connection error
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<LinkState>,
        mut shutdown_rx: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
        sink: SinkSlot,
    ) {
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown_rx.borrow() => {
                            debug!(target: "mqtt_transport", "Shutdown signal received, stopping event loop");
                            break;
                        }
                        Ok(()) => {}
                        // Sender gone after a clean disconnect: keep polling until it is sent
                        Err(_) => shutdown_open = false,
                    }
                }

                result = event_loop.poll() => {
                    match result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(route, &state_tx, &connected, &sink) {
                                break;
                            }
                        }
                        Err(e) => {
                            Self::handle_connection_error(&e.to_string(), &state_tx, &connected, &sink);
                            break;
                        }
                    }
                }
            }
        }

        connected.store(false, Ordering::Release);
        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }

    /// Act on a routed event; returns `false` to stop the loop
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<LinkState>,
        connected: &AtomicBool,
        sink: &SinkSlot,
    ) -> bool {
        match route {
            EventRoute::ConnectionAccepted => {
                connected.store(true, Ordering::Release);
                let _ = state_tx.send(LinkState::Connected);
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                Self::handle_connection_error(&format!("connection refused: {reason}"), state_tx, connected, sink);
                false
            }
            EventRoute::MessageReceived(message) => {
                tracing::debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", message.topic);
                match current_sink(sink) {
                    Some(sink) => {
                        if !sink.on_message(message) {
                            debug!(target: "mqtt_transport", "Inbound message not accepted by event queue");
                        }
                    }
                    None => debug!(target: "mqtt_transport", "No event sink registered, dropping message"),
                }
                true
            }
            EventRoute::Disconnected(reason) => {
                Self::handle_connection_error(&format!("broker disconnected: {reason}"), state_tx, connected, sink);
                false
            }
            EventRoute::DisconnectSent => {
                debug!(target: "mqtt_transport", "DISCONNECT sent");
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                tracing::debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Report a lost or failed connection
    ///
    /// Fails a pending handshake, and signals an unexpected close only when
    /// the connection was established and no disconnect was requested.
    fn handle_connection_error(
        reason: &str,
        state_tx: &watch::Sender<LinkState>,
        connected: &AtomicBool,
        sink: &SinkSlot,
    ) {
        let was_connected = connected.swap(false, Ordering::AcqRel);
        let _ = state_tx.send(LinkState::Failed(reason.to_string()));

        if was_connected {
            warn!(target: "mqtt_transport", "MQTT connection lost: {}", reason);
            if let Some(sink) = current_sink(sink) {
                sink.on_connection_closed();
            }
        } else {
            debug!(target: "mqtt_transport", "MQTT connection error: {}", reason);
        }
    }
}

fn current_sink(slot: &SinkSlot) -> Option<EventSink> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[async_trait]
impl BrokerBackend for RumqttcBackend {
    async fn connect(&mut self, request: &ConnectRequest) -> Result<(), BackendError> {
        self.stop_event_loop();

        let options = configure_mqtt_options(&self.settings, request)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            self.connected.clone(),
            self.sink.clone(),
        ));
        self.shutdown_tx = Some(shutdown_tx);
        self.event_loop_handle = Some(handle);

        info!(
            endpoint = %self.settings.endpoint(),
            client_id = %request.client_id,
            "Connecting to MQTT broker"
        );

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, request.timeout).await {
            error!(endpoint = %self.settings.endpoint(), error = %e, "MQTT handshake failed");
            self.stop_event_loop();
            return Err(e);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.forwarder_handle = Some(tokio::spawn(Self::forward_requests(client, outbound_rx)));
        self.outbound_tx = Some(outbound_tx);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        let result = self.enqueue(Outbound::Disconnect);

        // Cleared after queueing so the resulting close is not reported as unexpected
        self.connected.store(false, Ordering::Release);

        // Both tasks drain what is queued, send the DISCONNECT and stop by themselves
        self.outbound_tx = None;
        self.shutdown_tx = None;
        self.event_loop_handle = None;
        self.forwarder_handle = None;
        result
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BackendError> {
        self.enqueue(Outbound::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        })
    }

    fn subscribe(&mut self, filters: &[String], qos: &[QoS]) -> Result<(), BackendError> {
        for (filter, qos) in filters.iter().zip(qos.iter()) {
            self.enqueue(Outbound::Subscribe {
                filter: filter.clone(),
                qos: *qos,
            })?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, filters: &[String]) -> Result<(), BackendError> {
        for filter in filters {
            self.enqueue(Outbound::Unsubscribe {
                filter: filter.clone(),
            })?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.outbound_tx.is_some() && self.connected.load(Ordering::Acquire)
    }

    fn set_event_sink(&mut self, sink: Option<EventSink>) {
        *self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sink;
    }
}

impl Drop for RumqttcBackend {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}
