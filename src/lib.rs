//! brokerlink - client-side MQTT façade
//!
//! Keeps a host application's control loop responsive while a broker client
//! performs network I/O on its own context.
//!
//! # Overview
//!
//! - Connection state machine with staged, cancellable connect and disconnect
//! - Double-buffered event queue between the I/O context and the control loop
//! - Topic-filter subscription registry with `+` and `#` wildcards
//! - Buffering of publish/subscribe/unsubscribe issued while disconnected
//!
//! # Quick Start
//!
//! ```rust
//! use brokerlink::client::{BrokerClient, Callback};
//! use brokerlink::config::ClientConfig;
//! use brokerlink::testing::MockFactory;
//!
//! # tokio_test::block_on(async {
//! let mut config = ClientConfig::default();
//! config.connection.delay_ms = 0;
//!
//! let factory = MockFactory::new();
//! let broker = factory.handle();
//! let mut client = BrokerClient::new(config, factory);
//!
//! // Buffered until the connection is up
//! client
//!     .subscribe("sensors/+/temp", Callback::new(|topic, payload| {
//!         println!("{topic}: {payload:?}");
//!     }))
//!     .unwrap();
//! client.connect();
//!
//! while !client.is_connected() {
//!     client.tick().await;
//! }
//!
//! broker.deliver("sensors/3/temp", "21.5");
//! assert_eq!(client.tick().await, 1);
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod global;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{BrokerClient, Callback, ConnectionState, FirstResponder, LifecycleEvent};
pub use config::*;
pub use error::{ClientError, ClientResult};
pub use protocol::*;
pub use transport::mqtt::{RumqttcBackend, RumqttcFactory};
