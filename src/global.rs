//! Process-wide client instance
//!
//! One [`BrokerClient`] can be installed with [`create`] and removed with
//! [`shutdown`]. The free functions operate on that instance so any call site
//! can publish or subscribe without holding a reference.
//!
//! Subscriber callbacks run inside [`tick`], which holds the instance. An
//! operation issued from a callback cannot take the instance, so it is queued
//! and applied right after dispatch, in the order it was issued.

use crate::client::{BrokerClient, Callback, ConnectionState, LifecycleEvent};
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics::MetricsSnapshot;
use crate::protocol::{QoS, MATCH_ALL};
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

static INSTANCE: Lazy<Mutex<Option<BrokerClient>>> = Lazy::new(|| Mutex::new(None));

static DEFERRED: Lazy<std::sync::Mutex<VecDeque<DeferredOp>>> =
    Lazy::new(|| std::sync::Mutex::new(VecDeque::new()));

/// Operation waiting for the instance to become available
enum DeferredOp {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        filter: String,
        qos: QoS,
        callback: Callback,
    },
    Unsubscribe {
        filter: String,
        callback: Callback,
    },
}

impl DeferredOp {
    fn apply(self, client: &mut BrokerClient) -> ClientResult<()> {
        match self {
            DeferredOp::Connect => {
                client.connect();
                Ok(())
            }
            DeferredOp::Disconnect => {
                client.disconnect();
                Ok(())
            }
            DeferredOp::Publish {
                topic,
                payload,
                qos,
                retain,
            } => client.publish_with(&topic, payload, qos, retain),
            DeferredOp::Subscribe {
                filter,
                qos,
                callback,
            } => client.subscribe_with_qos(&filter, qos, callback),
            DeferredOp::Unsubscribe { filter, callback } => client.unsubscribe(&filter, &callback),
        }
    }
}

fn deferred() -> std::sync::MutexGuard<'static, VecDeque<DeferredOp>> {
    DEFERRED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn apply_deferred(client: &mut BrokerClient) {
    let ops: Vec<DeferredOp> = deferred().drain(..).collect();
    if !ops.is_empty() {
        debug!(count = ops.len(), "Applying deferred operations");
    }
    for op in ops {
        if let Err(e) = op.apply(client) {
            warn!(error = %e, "Deferred operation failed");
        }
    }
}

/// Run `op` now if the instance is free, otherwise queue it
fn run_or_defer(op: DeferredOp) -> ClientResult<()> {
    match INSTANCE.try_lock() {
        Ok(mut guard) => {
            let client = guard.as_mut().ok_or(ClientError::NotInstalled)?;
            apply_deferred(client);
            op.apply(client)
        }
        Err(_) => {
            debug!("Client busy, deferring operation");
            deferred().push_back(op);
            Ok(())
        }
    }
}

/// Install `client` as the process-wide instance
pub async fn create(client: BrokerClient) -> ClientResult<()> {
    let mut guard = INSTANCE.lock().await;
    if guard.is_some() {
        return Err(ClientError::AlreadyInstalled);
    }
    deferred().clear();
    *guard = Some(client);
    info!("Broker client installed");
    Ok(())
}

/// Tear down and remove the process-wide instance
///
/// Returns `false` when nothing was installed.
pub async fn shutdown() -> bool {
    let mut guard = INSTANCE.lock().await;
    deferred().clear();
    match guard.take() {
        Some(mut client) => {
            client.shutdown();
            info!("Broker client removed");
            true
        }
        None => false,
    }
}

pub async fn is_installed() -> bool {
    INSTANCE.lock().await.is_some()
}

pub async fn state() -> ClientResult<ConnectionState> {
    let guard = INSTANCE.lock().await;
    guard.as_ref().map(BrokerClient::state).ok_or(ClientError::NotInstalled)
}

pub async fn metrics() -> ClientResult<MetricsSnapshot> {
    let guard = INSTANCE.lock().await;
    guard.as_ref().map(BrokerClient::metrics).ok_or(ClientError::NotInstalled)
}

pub async fn lifecycle() -> ClientResult<broadcast::Receiver<LifecycleEvent>> {
    let guard = INSTANCE.lock().await;
    guard.as_ref().map(BrokerClient::lifecycle).ok_or(ClientError::NotInstalled)
}

/// Tick the instance, then apply operations deferred by its callbacks
pub async fn tick() -> ClientResult<usize> {
    let mut guard = INSTANCE.lock().await;
    let client = guard.as_mut().ok_or(ClientError::NotInstalled)?;
    apply_deferred(client);
    let dispatched = client.tick().await;
    apply_deferred(client);
    Ok(dispatched)
}

pub fn connect() -> ClientResult<()> {
    run_or_defer(DeferredOp::Connect)
}

pub fn disconnect() -> ClientResult<()> {
    run_or_defer(DeferredOp::Disconnect)
}

pub fn publish(topic: &str, payload: impl AsRef<[u8]>) -> ClientResult<()> {
    publish_with(topic, payload, QoS::default(), false)
}

pub fn publish_with(
    topic: &str,
    payload: impl AsRef<[u8]>,
    qos: QoS,
    retain: bool,
) -> ClientResult<()> {
    run_or_defer(DeferredOp::Publish {
        topic: topic.to_string(),
        payload: Bytes::copy_from_slice(payload.as_ref()),
        qos,
        retain,
    })
}

pub fn subscribe(filter: &str, callback: Callback) -> ClientResult<()> {
    subscribe_with_qos(filter, QoS::default(), callback)
}

pub fn subscribe_all(callback: Callback) -> ClientResult<()> {
    subscribe_with_qos(MATCH_ALL, QoS::default(), callback)
}

pub fn subscribe_with_qos(filter: &str, qos: QoS, callback: Callback) -> ClientResult<()> {
    run_or_defer(DeferredOp::Subscribe {
        filter: filter.to_string(),
        qos,
        callback,
    })
}

pub fn unsubscribe(filter: &str, callback: &Callback) -> ClientResult<()> {
    run_or_defer(DeferredOp::Unsubscribe {
        filter: filter.to_string(),
        callback: callback.clone(),
    })
}

pub fn unsubscribe_all(callback: &Callback) -> ClientResult<()> {
    unsubscribe(MATCH_ALL, callback)
}
