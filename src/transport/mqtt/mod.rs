//! rumqttc-backed broker backend
//!
//! Pure functions are kept apart from I/O for testability:
//!
//! - [`connection`] - Endpoint validation, option building, QoS conversion
//! - [`message_handler`] - Routing of rumqttc events
//! - [`client`] - The backend itself and its event-loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use brokerlink::client::BrokerClient;
//! use brokerlink::config::ClientConfig;
//!
//! # tokio_test::block_on(async {
//! let mut client = BrokerClient::with_rumqttc(ClientConfig::default());
//! client.connect();
//! loop {
//!     client.tick().await;
//!     if client.is_connected() {
//!         break;
//!     }
//! }
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttcBackend, RumqttcFactory};
pub use connection::{configure_mqtt_options, validate_endpoint};
pub use message_handler::{EventRoute, MessageHandler};
