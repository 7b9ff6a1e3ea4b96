//! Message types flowing through the emission pipeline
//!
//! A [`LogRecord`] is what the tracing layer captures, an [`OutboundMessage`]
//! is what goes to the broker, and a [`PublishOutcome`] says how the recovery
//! policy ended.

use super::topics::TopicBuilder;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;

/// MQTT delivery guarantee
///
/// # Examples
/// ```
/// use mqtt_logging::protocol::QosLevel;
///
/// assert_eq!(QosLevel::try_from(1).unwrap(), QosLevel::AtLeastOnce);
/// assert!(QosLevel::try_from(3).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Immutable snapshot of one log event
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    /// Source module name, e.g. `runner` for `src/runner.rs`
    pub module: String,
    /// Rendered message text, structured fields included
    pub message: String,
}

impl LogRecord {
    pub fn new(level: Level, module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            module: module.into(),
            message: message.into(),
        }
    }
}

/// One message bound for the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QosLevel,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<String>,
        qos: QosLevel,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Copy with wildcards replaced in both topic and payload and QoS raised to 1
    pub fn sanitized(&self) -> Self {
        Self {
            topic: TopicBuilder::sanitize(&self.topic),
            payload: TopicBuilder::sanitize(&self.payload),
            qos: QosLevel::AtLeastOnce,
            retain: self.retain,
        }
    }

    /// Diagnostic report for `{project}/error`, always QoS 1 and retained
    pub fn error_report(project: &str, report: impl Into<String>) -> Self {
        Self {
            topic: TopicBuilder::sanitize(&TopicBuilder::error_topic(project)),
            payload: report.into(),
            qos: QosLevel::AtLeastOnce,
            retain: true,
        }
    }
}

/// How one run of the recovery policy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Published on the first attempt
    Delivered,
    /// Published after the sanitize-and-retry step
    DeliveredSanitized,
    /// Not published, failure text sent to the error topic
    Reported,
    /// Not published and the error report failed too
    Dropped,
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            PublishOutcome::Delivered | PublishOutcome::DeliveredSanitized
        )
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishOutcome::Delivered => "delivered",
            PublishOutcome::DeliveredSanitized => "delivered_sanitized",
            PublishOutcome::Reported => "reported",
            PublishOutcome::Dropped => "dropped",
        };
        f.write_str(name)
    }
}
