//! Message types carried between the broker connection and the control loop
//!
//! Independent of the underlying MQTT library; backends convert into these.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MQTT delivery guarantee
///
/// Defaults to [`QoS::ExactlyOnce`], matching the default used by
/// `publish` and `subscribe` on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    #[default]
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse a numeric QoS level; anything above 2 is invalid
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS{}", self.as_u8())
    }
}

/// A message delivered by the broker
///
/// Created by the backend's receive path, owned by the event queue until it
/// is dispatched on the control loop. The QoS/retain/dup flags are carried
/// through untouched; the core never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::default(),
            retain: false,
            dup: false,
        }
    }

    /// Attach the delivery flags reported by the broker
    pub fn with_flags(mut self, qos: QoS, retain: bool, dup: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self.dup = dup;
        self
    }

    /// Lossy UTF-8 view of the payload, for logging
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
