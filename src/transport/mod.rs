//! Transport layer for broker sessions
//!
//! This module provides the session abstraction the emission pipeline talks
//! to, and the MQTT implementation of it. The traits are the injection seam
//! for tests: [`crate::testing::MockConnector`] counts every session it opens
//! and closes.

use crate::protocol::OutboundMessage;
use async_trait::async_trait;
use tracing::debug;

pub mod mqtt;

pub use mqtt::{BrokerEndpoint, FailureKind, MqttError};

/// Opens sessions against a broker endpoint
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect and wait for the broker's acknowledgement
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerSession>, MqttError>;
}

/// One live connection to a broker
#[async_trait]
pub trait BrokerSession: Send {
    /// Publish a message and wait for the acknowledgement its QoS requires
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError>;

    /// Close the session; calling it again is a no-op
    async fn disconnect(&mut self) -> Result<(), MqttError>;

    /// Whether the session can still publish
    fn is_connected(&self) -> bool;
}

/// Connect, publish one message, disconnect
///
/// The session is closed on every path out of this function, including a
/// failed publish.
pub async fn publish_once(
    connector: &dyn BrokerConnector,
    endpoint: &BrokerEndpoint,
    message: &OutboundMessage,
) -> Result<(), MqttError> {
    let mut session = connector.connect(endpoint).await?;
    let result = session.publish(message).await;

    if let Err(e) = session.disconnect().await {
        debug!(error = %e, "Disconnect after one-shot publish failed");
    }

    result
}
