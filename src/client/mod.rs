//! Client-side orchestration over a broker connection
//!
//! The [`BrokerClient`] owns the connection state machine, the inbound event
//! queue, the pending-operation buffer and the subscription registry. It is
//! driven by one control loop calling [`BrokerClient::tick`].

pub mod controller;
pub mod lifecycle;
pub mod pending;
pub mod queue;
pub mod registry;
pub mod responder;

pub use controller::BrokerClient;
pub use lifecycle::{ConnectionState, LifecycleEvent};
pub use pending::{FlushReport, PendingOperations};
pub use queue::{EventQueue, EventSink};
pub use registry::{Callback, CallbackFailure, DispatchReport, SubscriptionRegistry};
pub use responder::FirstResponder;
