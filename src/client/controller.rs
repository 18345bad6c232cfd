//! Connection lifecycle state machine
//!
//! [`BrokerClient`] is driven by a single control loop calling [`BrokerClient::tick`]
//! once per iteration. Connect and disconnect requests start staged sequences
//! that advance on those ticks using the loop's own clock, so nothing here
//! runs on a separate thread. Only the event queue is shared with the
//! backend's I/O context.

use super::lifecycle::{ConnectionState, LifecycleEvent, LifecycleNotifier};
use super::pending::PendingOperations;
use super::queue::EventQueue;
use super::registry::{Callback, SubscriptionRegistry};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics::{ClientMetrics, MetricsSnapshot};
use crate::protocol::{QoS, MATCH_ALL};
use crate::transport::mqtt::RumqttcFactory;
use crate::transport::{BackendError, BackendFactory, BrokerBackend, ConnectRequest};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Ticks between backend construction and the handshake
pub const SETTLE_TICKS: u8 = 2;

/// Stage of an in-flight connect sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStage {
    /// Waiting for the configured delay to elapse
    Delay { until: Instant },
    /// Create the backend if there is none yet
    Construct,
    /// Let the host settle before the blocking handshake
    Settle { remaining: u8 },
}

/// Client-side façade over one broker connection
pub struct BrokerClient {
    config: ClientConfig,
    factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn BrokerBackend>>,
    state: ConnectionState,
    queue: EventQueue,
    pending: PendingOperations,
    registry: SubscriptionRegistry,
    connect_stage: Option<ConnectStage>,
    disconnect_requested: bool,
    notifier: LifecycleNotifier,
    metrics: Arc<ClientMetrics>,
    reported_drops: u64,
}

impl BrokerClient {
    /// Create a client; starts connecting right away when `auto_connect` is set
    pub fn new(config: ClientConfig, factory: impl BackendFactory + 'static) -> Self {
        let metrics = Arc::new(ClientMetrics::new());
        let queue = EventQueue::new(config.queue.capacity, metrics.clone());
        let auto_connect = config.connection.auto_connect;

        let mut client = Self {
            config,
            factory: Box::new(factory),
            backend: None,
            state: ConnectionState::Disconnected,
            queue,
            pending: PendingOperations::new(),
            registry: SubscriptionRegistry::new(),
            connect_stage: None,
            disconnect_requested: false,
            notifier: LifecycleNotifier::new(),
            metrics,
            reported_drops: 0,
        };

        if auto_connect {
            client.connect();
        }
        client
    }

    /// Client backed by rumqttc
    pub fn with_rumqttc(config: ClientConfig) -> Self {
        Self::new(config, RumqttcFactory)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True while a connect sequence is in flight
    pub fn is_connecting(&self) -> bool {
        self.connect_stage.is_some()
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Receive every lifecycle event emitted from now on
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.notifier.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending(&self) -> &PendingOperations {
        &self.pending
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Start a new connect sequence, cancelling any in-flight one
    ///
    /// No-op while connected, unless a disconnect is already requested.
    pub fn connect(&mut self) {
        if self.state == ConnectionState::Connected && !self.disconnect_requested {
            debug!("Connect requested while already connected, ignoring");
            return;
        }

        if self.connect_stage.is_some() {
            debug!("Cancelling in-flight connect sequence");
        }

        let delay = self.config.connection.delay();
        self.connect_stage = Some(ConnectStage::Delay {
            until: Instant::now() + delay,
        });
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
        self.metrics.connection_attempt();
        info!(
            endpoint = %self.config.broker.endpoint(),
            delay_ms = delay.as_millis() as u64,
            "Connect sequence started"
        );
    }

    /// Request a disconnect, performed on the next tick
    ///
    /// No-op when no backend exists. Cancels an in-flight connect sequence.
    pub fn disconnect(&mut self) {
        if self.backend.is_none() {
            debug!("Disconnect requested without a broker client, ignoring");
            return;
        }

        if self.connect_stage.take().is_some() {
            debug!("Disconnect cancels in-flight connect sequence");
        }
        self.disconnect_requested = true;
    }

    /// Cancel every sequence and tear down immediately
    pub fn shutdown(&mut self) {
        let was_active = self.backend.is_some() || self.connect_stage.is_some();
        self.connect_stage = None;
        self.disconnect_requested = false;

        if was_active {
            self.teardown();
        } else {
            self.queue.clear();
            self.pending.clear();
            self.registry.clear();
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Advance the control loop by one iteration
    ///
    /// Runs a requested disconnect, advances the connect sequence, drains the
    /// event queue through the registry and reports an unexpected close.
    /// Returns the number of inbound messages dispatched.
    pub async fn tick(&mut self) -> usize {
        if self.disconnect_requested {
            self.disconnect_requested = false;
            self.teardown();
        }

        self.advance_connect_sequence().await;

        let registry = &self.registry;
        let metrics = &self.metrics;
        let dispatched = self.queue.drain_tick(|message| {
            debug!(topic = %message.topic, bytes = message.payload.len(), "Dispatching inbound message");
            let report = registry.dispatch(message);
            if report.matched_filters > 0 {
                metrics.message_dispatched();
            }
            for _ in 0..report.failed {
                metrics.callback_failed();
            }
        });

        let dropped = self.metrics.messages_dropped();
        if dropped > self.reported_drops {
            warn!(
                dropped = dropped - self.reported_drops,
                capacity = self.queue.capacity(),
                "Event queue full, inbound messages dropped"
            );
            self.reported_drops = dropped;
        }

        if self.queue.take_unexpected_close() && self.state == ConnectionState::Connected {
            self.handle_connection_lost();
        }

        dispatched
    }

    /// Publish with QoS 2 and no retain flag
    pub fn publish(&mut self, topic: &str, payload: impl AsRef<[u8]>) -> ClientResult<()> {
        self.publish_with(topic, payload, QoS::default(), false)
    }

    /// Publish now when connected, otherwise buffer until the next connect
    pub fn publish_with(
        &mut self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        let payload = Bytes::copy_from_slice(payload.as_ref());

        let live = self.link_is_up();
        match self.backend.as_mut() {
            Some(backend) if live => {
                let _span = crate::mqtt_span!(operation = "publish", topic = %topic, qos = %qos).entered();
                if let Err(e) = backend.publish(topic, payload, qos, retain) {
                    self.metrics.operation_failed();
                    warn!(topic = %topic, error = %e, "Publish failed");
                    return Err(e.into());
                }
                self.metrics.publication_sent();
                debug!(topic = %topic, "Published");
            }
            _ => {
                self.pending.push_publication(topic, payload, qos, retain);
                self.metrics.publication_buffered();
                debug!(topic = %topic, "Not connected, publication buffered");
            }
        }
        Ok(())
    }

    /// Subscribe with QoS 2
    pub fn subscribe(&mut self, filter: &str, callback: Callback) -> ClientResult<()> {
        self.subscribe_with_qos(filter, QoS::default(), callback)
    }

    /// Subscribe to every topic
    pub fn subscribe_all(&mut self, callback: Callback) -> ClientResult<()> {
        self.subscribe_with_qos(MATCH_ALL, QoS::default(), callback)
    }

    /// Register `callback` for `filter`
    ///
    /// A new filter is subscribed live when connected, otherwise buffered.
    /// The registry entry is kept even if the live subscribe fails.
    pub fn subscribe_with_qos(
        &mut self,
        filter: &str,
        qos: QoS,
        callback: Callback,
    ) -> ClientResult<()> {
        // Checked first: a surfaced loss re-arms only the filters already registered
        let live = self.link_is_up();
        if !self.registry.subscribe(filter, qos, callback) {
            return Ok(());
        }

        let filters = [filter.to_string()];
        match self.backend.as_mut() {
            Some(backend) if live => {
                if let Err(e) = backend.subscribe(&filters, &[qos]) {
                    self.metrics.operation_failed();
                    warn!(filter = %filter, error = %e, "Subscribe failed");
                    return Err(e.into());
                }
                self.metrics.subscription_sent();
                debug!(filter = %filter, qos = %qos, "Subscribed");
            }
            _ => {
                self.pending.push_subscription(filter, qos);
                self.metrics.subscription_buffered();
                debug!(filter = %filter, "Not connected, subscription buffered");
            }
        }
        Ok(())
    }

    /// Remove `callback` from `filter`; the last callback out unsubscribes the filter
    pub fn unsubscribe(&mut self, filter: &str, callback: &Callback) -> ClientResult<()> {
        if !self.registry.unsubscribe(filter, callback) {
            return Ok(());
        }

        let live = self.link_is_up();
        let filters = [filter.to_string()];
        match self.backend.as_mut() {
            Some(backend) if live => {
                if let Err(e) = backend.unsubscribe(&filters) {
                    self.metrics.operation_failed();
                    warn!(filter = %filter, error = %e, "Unsubscribe failed");
                    return Err(e.into());
                }
                debug!(filter = %filter, "Unsubscribed");
            }
            _ => {
                self.pending.push_unsubscription(filter);
                debug!(filter = %filter, "Not connected, unsubscription buffered");
            }
        }
        Ok(())
    }

    /// Remove `callback` from the match-all filter
    pub fn unsubscribe_all(&mut self, callback: &Callback) -> ClientResult<()> {
        self.unsubscribe(MATCH_ALL, callback)
    }

    /// True when operations can go to the backend right now
    ///
    /// A link the I/O context has dropped but no tick has reported yet is
    /// surfaced here as a connection loss, so nothing is buffered while the
    /// state still reads `Connected`.
    fn link_is_up(&mut self) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        if self.backend.as_ref().is_some_and(|backend| backend.is_connected()) {
            return true;
        }
        if !self.disconnect_requested {
            self.handle_connection_lost();
        }
        false
    }

    async fn advance_connect_sequence(&mut self) {
        let Some(stage) = self.connect_stage.take() else {
            return;
        };

        self.connect_stage = match stage {
            ConnectStage::Delay { until } if Instant::now() < until => Some(stage),
            ConnectStage::Delay { .. } => Some(ConnectStage::Construct),
            ConnectStage::Construct => match self.construct_backend() {
                Ok(()) => {
                    self.state = ConnectionState::Connecting;
                    self.notifier.emit(LifecycleEvent::Connecting);
                    Some(ConnectStage::Settle {
                        remaining: SETTLE_TICKS,
                    })
                }
                Err(e) => {
                    self.fail_connect(e);
                    None
                }
            },
            ConnectStage::Settle { remaining } if remaining > 1 => Some(ConnectStage::Settle {
                remaining: remaining - 1,
            }),
            ConnectStage::Settle { .. } => {
                self.handshake().await;
                None
            }
        };
    }

    fn construct_backend(&mut self) -> ClientResult<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        let settings = &self.config.broker;
        let backend = self
            .factory
            .create(settings)
            .map_err(|e| ClientError::construction(settings.endpoint(), &e.to_string()))?;
        debug!(endpoint = %settings.endpoint(), "Broker client created");
        self.backend = Some(backend);
        Ok(())
    }

    async fn handshake(&mut self) {
        let endpoint = self.config.broker.endpoint();
        let Some(backend) = self.backend.as_mut() else {
            self.fail_connect(ClientError::construction(endpoint, "broker client missing"));
            return;
        };

        let (username, password) = self.config.connection.credentials();
        let timeout = self.config.connection.timeout();
        let request = ConnectRequest {
            client_id: Uuid::new_v4().to_string(),
            username,
            password,
            timeout,
            keep_alive: self.config.connection.keep_alive(),
        };

        let span = crate::lifecycle_span!(
            stage = "handshake",
            endpoint = %endpoint,
            client_id = %request.client_id
        );
        let outcome = tokio::time::timeout(timeout, backend.connect(&request))
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(())) => self.on_connected(),
            Ok(Err(e)) => self.fail_connect(ClientError::handshake(endpoint, &e.to_string())),
            Err(_) => self.fail_connect(ClientError::handshake(
                endpoint,
                &BackendError::Timeout(timeout).to_string(),
            )),
        }
    }

    fn on_connected(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        backend.set_event_sink(Some(self.queue.sink()));

        let report = self.pending.flush_all(backend.as_mut());
        for _ in 0..report.failed {
            self.metrics.operation_failed();
        }

        self.state = ConnectionState::Connected;
        self.metrics.connection_established();
        info!(
            endpoint = %self.config.broker.endpoint(),
            flushed = report.attempted,
            "Connected to broker"
        );
        self.notifier.emit(LifecycleEvent::Connected);
    }

    fn fail_connect(&mut self, error: ClientError) {
        error!("{}", error);

        if let Some(mut backend) = self.backend.take() {
            backend.set_event_sink(None);
        }
        self.state = ConnectionState::Disconnected;
        self.metrics.connection_failed();
        self.notifier
            .emit(LifecycleEvent::ConnectionFailed(Arc::new(error)));
    }

    fn handle_connection_lost(&mut self) {
        warn!(
            endpoint = %self.config.broker.endpoint(),
            "{}",
            ClientError::UnexpectedClose
        );

        self.state = ConnectionState::Disconnected;
        // Reported now; the latch must not fire again after a reconnect
        self.queue.take_unexpected_close();

        // Subscriptions are restored on the next successful connect
        for (filter, qos) in self.registry.subscriptions() {
            if !self.pending.has_subscription(&filter) {
                self.pending.push_subscription(filter, qos);
            }
        }

        self.metrics.connection_lost();
        self.notifier.emit(LifecycleEvent::ConnectionLost);
    }

    fn teardown(&mut self) {
        let _span = crate::lifecycle_span!(stage = "disconnect").entered();

        if let Some(mut backend) = self.backend.take() {
            if backend.is_connected() {
                let filters = self.registry.filters();
                if !filters.is_empty() {
                    if let Err(e) = backend.unsubscribe(&filters) {
                        warn!(error = %e, "Failed to unsubscribe before disconnect");
                    }
                }
                if let Err(e) = backend.disconnect() {
                    warn!(error = %e, "Disconnect request failed");
                }
            }
            backend.set_event_sink(None);
        }

        self.queue.clear();
        self.pending.clear();
        self.registry.clear();
        self.state = if self.connect_stage.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };
        self.metrics.disconnected();

        info!(endpoint = %self.config.broker.endpoint(), "Disconnected from broker");
        self.notifier.emit(LifecycleEvent::Disconnected);
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if backend.is_connected() {
                if let Err(e) = backend.disconnect() {
                    warn!(error = %e, "Disconnect on drop failed");
                }
            }
            backend.set_event_sink(None);
        }
    }
}
