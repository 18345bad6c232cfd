//! Filtered responder callback
//!
//! Fires a handler only for one topic and one payload value. A blank value
//! or `#` in either position means "any".

use super::registry::{Callback, CallbackFailure};
use crate::protocol::MATCH_ALL;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstResponder {
    topic: String,
    payload: String,
}

impl FirstResponder {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Responds to every topic and payload
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter to subscribe with: the configured topic, or `#`
    pub fn filter(&self) -> &str {
        if is_wildcard(&self.topic) {
            MATCH_ALL
        } else {
            &self.topic
        }
    }

    /// Pure predicate for a `(topic, payload)` pair
    pub fn accepts(&self, topic: &str, payload: &str) -> bool {
        (is_wildcard(&self.topic) || self.topic == topic)
            && (is_wildcard(&self.payload) || self.payload == payload)
    }

    /// Build a callback invoking `handler` with the payload text of accepted
    /// messages. Empty payloads are reported as failures.
    pub fn into_callback<F>(self, handler: F) -> Callback
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let responder = Arc::new(self);
        Callback::fallible(move |topic, payload| {
            if payload.is_empty() {
                return Err(CallbackFailure::new(format!("empty payload on '{topic}'")));
            }

            let text = String::from_utf8_lossy(payload);
            if responder.accepts(topic, &text) {
                handler(&text);
            } else {
                debug!(topic = %topic, "Responder ignored message");
            }
            Ok(())
        })
    }
}

fn is_wildcard(value: &str) -> bool {
    value.trim().is_empty() || value == MATCH_ALL
}
