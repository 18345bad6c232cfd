//! Testing utilities and mock implementations
//!
//! Mock broker backend and factory for exercising the client without a
//! running MQTT broker.

pub mod mocks;

pub use mocks::*;
