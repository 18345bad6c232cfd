//! Pure routing of rumqttc events
//!
//! Classifies every event produced by the rumqttc event loop so the I/O task
//! only has to act on the decision.

use super::connection::from_mqtt_qos;
use crate::protocol::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAccepted,
    /// Broker answered the handshake with a failure code
    ConnectionRefused(String),
    /// Publish received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent a DISCONNECT
    Disconnected(String),
    /// Our own DISCONNECT went out; the loop can stop
    DisconnectSent,
    /// Subscription acknowledged
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Other outgoing activity
    OutgoingEvent,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route a rumqttc event (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => Self::route_incoming(packet),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn route_incoming(packet: &Packet) -> EventRoute {
        match packet {
            Packet::ConnAck(connack) => match connack.code {
                ConnectReturnCode::Success => EventRoute::ConnectionAccepted,
                code => EventRoute::ConnectionRefused(format!("{code:?}")),
            },
            Packet::Publish(publish) => {
                let message = InboundMessage::new(
                    String::from_utf8_lossy(&publish.topic).into_owned(),
                    publish.payload.clone(),
                )
                .with_flags(from_mqtt_qos(publish.qos), publish.retain, publish.dup);
                EventRoute::MessageReceived(message)
            }
            Packet::Disconnect(disconnect) => {
                EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
            }
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        }
    }
}
