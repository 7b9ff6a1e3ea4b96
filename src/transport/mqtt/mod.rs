//! MQTT sessions over rumqttc
//!
//! This module separates the pure parts of talking to a broker from the I/O:
//!
//! - [`connection`] - Endpoint description, option building and error types
//! - [`client`] - Sessions that drive the rumqttc event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_logging::config::LoggingConfig;
//! use mqtt_logging::protocol::{OutboundMessage, QosLevel};
//! use mqtt_logging::transport::mqtt::{BrokerEndpoint, RumqttcConnector};
//! use mqtt_logging::transport::publish_once;
//!
//! # tokio_test::block_on(async {
//! let config = LoggingConfig::default();
//! let endpoint = BrokerEndpoint::from_config(&config)?;
//! let message = OutboundMessage::new("DVT/metrics", "cpu=12", QosLevel::AtLeastOnce, false);
//!
//! publish_once(&RumqttcConnector, &endpoint, &message).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

// Re-export public types for convenience
pub use client::{RumqttcConnector, V4Session, V5Session};
pub use connection::{BrokerEndpoint, FailureKind, LastWillMessage, MqttError};
