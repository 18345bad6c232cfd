//! Protocol-level types shared by the client core and the transports
//!
//! Inbound message representation, QoS levels and topic filter matching.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
