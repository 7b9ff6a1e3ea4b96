//! Message types and topic rules for MQTT log forwarding
//!
//! Everything in here is pure: no I/O, no broker, no runtime.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
