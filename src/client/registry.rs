//! Topic filter registry and dispatch
//!
//! Maps each filter to an ordered, duplicate-free list of callbacks. Filters
//! keep their insertion order so dispatch is deterministic.

use crate::error::ClientError;
use crate::protocol::{topic_matches, InboundMessage, QoS};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Failure reported by a subscriber callback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackFailure(pub String);

impl CallbackFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<&str> for CallbackFailure {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for CallbackFailure {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

type CallbackFn = dyn Fn(&str, &[u8]) -> Result<(), CallbackFailure> + Send + Sync;

/// Subscriber callback handle
///
/// Clones share identity: a clone unsubscribes the original. Two callbacks
/// created separately are never equal, even from the same closure.
#[derive(Clone)]
pub struct Callback {
    id: u64,
    func: Arc<CallbackFn>,
}

impl Callback {
    /// Wrap a handler that cannot fail
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        Self::fallible(move |topic, payload| {
            handler(topic, payload);
            Ok(())
        })
    }

    /// Wrap a handler that reports failures
    pub fn fallible<F>(handler: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Result<(), CallbackFailure> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(handler),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Invoke the handler, turning both `Err` and panics into a failure
    pub fn invoke(&self, topic: &str, payload: &[u8]) -> Result<(), CallbackFailure> {
        match catch_unwind(AssertUnwindSafe(|| (self.func)(topic, payload))) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "callback panicked".to_string());
                Err(CallbackFailure(format!("panic: {reason}")))
            }
        }
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
struct FilterEntry {
    filter: String,
    qos: QoS,
    callbacks: Vec<Callback>,
}

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched_filters: usize,
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<FilterEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_index(&self, filter: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.filter == filter)
    }

    /// Register `callback` for `filter`
    ///
    /// Returns `true` when the filter entry was created by this call. The QoS
    /// of the first subscription to a filter is the one remembered.
    pub fn subscribe(&mut self, filter: &str, qos: QoS, callback: Callback) -> bool {
        match self.entry_index(filter) {
            Some(index) => {
                let callbacks = &mut self.entries[index].callbacks;
                if !callbacks.contains(&callback) {
                    callbacks.push(callback);
                }
                false
            }
            None => {
                self.entries.push(FilterEntry {
                    filter: filter.to_string(),
                    qos,
                    callbacks: vec![callback],
                });
                true
            }
        }
    }

    /// Remove `callback` from `filter`
    ///
    /// Returns `true` when the filter entry was removed because no callbacks
    /// remain. Unknown filters and callbacks are ignored.
    pub fn unsubscribe(&mut self, filter: &str, callback: &Callback) -> bool {
        let Some(index) = self.entry_index(filter) else {
            return false;
        };

        let callbacks = &mut self.entries[index].callbacks;
        let Some(position) = callbacks.iter().position(|c| c == callback) else {
            return false;
        };
        callbacks.remove(position);

        if callbacks.is_empty() {
            self.entries.remove(index);
            true
        } else {
            false
        }
    }

    /// Invoke every callback of every filter matching the message topic
    ///
    /// Failures are logged per callback and never stop the remaining callbacks.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let mut report = DispatchReport::default();

        for entry in self.entries.iter().filter(|e| topic_matches(&e.filter, &message.topic)) {
            report.matched_filters += 1;
            for callback in &entry.callbacks {
                report.invoked += 1;
                if let Err(failure) = callback.invoke(&message.topic, &message.payload) {
                    report.failed += 1;
                    let error = ClientError::callback(&entry.filter, &message.topic, &failure.0);
                    error!(filter = %entry.filter, topic = %message.topic, "{}", error);
                }
            }
        }

        if report.matched_filters == 0 {
            debug!(topic = %message.topic, "No subscription matches inbound message");
        }
        report
    }

    /// `(filter, qos)` of every registered filter, in registration order
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.entries.iter().map(|e| (e.filter.clone(), e.qos)).collect()
    }

    pub fn filters(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.filter.clone()).collect()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entry_index(filter).is_some()
    }

    pub fn callback_count(&self, filter: &str) -> usize {
        self.entry_index(filter)
            .map_or(0, |index| self.entries[index].callbacks.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
