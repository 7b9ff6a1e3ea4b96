//! Testing utilities and mock implementations
//!
//! This module provides a counting broker stand-in for exercising the
//! emission pipeline without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
