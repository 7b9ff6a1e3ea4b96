//! One publish cycle per log record

use super::format::RecordFormat;
use crate::protocol::{LogRecord, OutboundMessage, PublishOutcome, QosLevel, TopicBuilder};
use crate::recovery::{publish_with_recovery, OneShotTarget};
use crate::transport::{BrokerConnector, BrokerEndpoint};
use std::sync::Arc;

/// Publishes formatted records to `{project}/{logger}/log`
///
/// Every record gets its own session, opened for the publish and closed
/// right after, so a broker that comes and goes never leaves the sink stuck
/// on a dead connection.
#[derive(Clone)]
pub struct SinkPublisher {
    connector: Arc<dyn BrokerConnector>,
    endpoint: BrokerEndpoint,
    project: String,
    topic: String,
    qos: QosLevel,
    retain: bool,
    format: RecordFormat,
}

impl SinkPublisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        endpoint: BrokerEndpoint,
        project: impl Into<String>,
        logger_name: &str,
        format: RecordFormat,
    ) -> Self {
        let project = project.into();
        Self {
            topic: TopicBuilder::log_topic(&project, logger_name),
            connector,
            endpoint,
            project,
            qos: QosLevel::AtLeastOnce,
            retain: true,
            format,
        }
    }

    /// Override the default QoS 1, retained delivery
    pub fn with_delivery(mut self, qos: QosLevel, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Format and publish one record; never fails
    pub async fn emit(&self, record: &LogRecord) -> PublishOutcome {
        let message = OutboundMessage::new(
            self.topic.as_str(),
            self.format.format_line(record),
            self.qos,
            self.retain,
        );

        let mut target = OneShotTarget::new(self.connector.as_ref(), &self.endpoint);
        publish_with_recovery(&mut target, &self.project, message).await
    }
}

impl std::fmt::Debug for SinkPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkPublisher")
            .field("endpoint", &self.endpoint.broker_addr())
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .finish()
    }
}
