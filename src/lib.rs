//! MQTT log forwarding
//!
//! Forwards application log records and ad-hoc data points to an MQTT
//! broker next to ordinary console and file output.
//!
//! # Overview
//!
//! - [`Logger`] - Named logger built by [`make_logger`], writing to the
//!   console, an optional timestamped file, and `{project}/{name}/log`
//! - [`DirectPublisher`] - `post(subtopic, payload, retain)` to
//!   `{project}/{subtopic}` over a shared session
//! - [`sink::MqttSink`] - The tracing layer behind the logger's MQTT output
//! - [`config::LoggingConfig`] - TOML file plus environment overrides
//!
//! Publishing never fails into the caller. A topic rejected for containing
//! `+` or `#` is retried once with both topic and payload sanitized; any
//! other failure is reported to `{project}/error` and then dropped.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_logging::{DirectPublisher, LoggingConfig};
//!
//! # tokio_test::block_on(async {
//! let config = LoggingConfig::from_env()?;
//! let publisher = DirectPublisher::from_config(&config)?;
//!
//! publisher.post("bench/temperature", "21.5", false).await;
//! publisher.close().await;
//! # Ok::<(), mqtt_logging::LoggerError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod recovery;
pub mod sink;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, LoggingConfig};
pub use error::{LoggerError, LoggerResult};
pub use factory::{make_logger, Destinations, Logger, LoggerFactory, SinkKind};
pub use protocol::*;
pub use publisher::DirectPublisher;
pub use transport::{BrokerEndpoint, MqttError};
