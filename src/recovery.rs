//! Publish with one sanitized retry and a best-effort error report
//!
//! Both the MQTT sink and the direct publisher run every message through
//! [`publish_with_recovery`]. The policy:
//!
//! 1. Publish the message as given.
//! 2. If the broker path rejected the topic because of a wildcard, sanitize
//!    topic and payload, raise QoS to 1, keep retain, and publish once more.
//! 3. If that retry fails, or the first failure was anything else, warn
//!    locally and publish the failure text to `{project}/error` (QoS 1,
//!    retained).
//! 4. If the report cannot be published either, give up silently.
//!
//! Nothing in here returns an error or panics; callers get a
//! [`PublishOutcome`] describing which step ended the cycle.

use crate::error::redact_error_report;
use crate::mqtt_span;
use crate::observability::metrics;
use crate::protocol::{OutboundMessage, PublishOutcome};
use crate::transport::{publish_once, BrokerConnector, BrokerEndpoint, FailureKind, MqttError};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Something a single publish attempt can be made against
#[async_trait]
pub trait PublishTarget: Send {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError>;
}

/// Opens a fresh session for every attempt and always closes it
pub struct OneShotTarget<'a> {
    connector: &'a dyn BrokerConnector,
    endpoint: &'a BrokerEndpoint,
}

impl<'a> OneShotTarget<'a> {
    pub fn new(connector: &'a dyn BrokerConnector, endpoint: &'a BrokerEndpoint) -> Self {
        Self {
            connector,
            endpoint,
        }
    }
}

#[async_trait]
impl PublishTarget for OneShotTarget<'_> {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError> {
        publish_once(self.connector, self.endpoint, message).await
    }
}

/// Run the full publish cycle for one message
pub async fn publish_with_recovery<T>(
    target: &mut T,
    project: &str,
    message: OutboundMessage,
) -> PublishOutcome
where
    T: PublishTarget + ?Sized,
{
    let started = Instant::now();
    let qos: u8 = message.qos.into();
    let span = mqtt_span!(topic = %message.topic, qos);

    let outcome = async {
        let failure = match target.publish(&message).await {
            Ok(()) => {
                debug!("Published");
                return PublishOutcome::Delivered;
            }
            Err(e) if e.kind() == FailureKind::InvalidTopic => {
                warn!(
                    topic = %message.topic,
                    payload = %message.payload,
                    "Publish failed because of a wildcard, retrying sanitized"
                );
                metrics().sanitized_retry();

                let retry = message.sanitized();
                match target.publish(&retry).await {
                    Ok(()) => {
                        debug!(topic = %retry.topic, "Sanitized retry published");
                        return PublishOutcome::DeliveredSanitized;
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        report_failure(target, project, &failure).await
    }
    .instrument(span)
    .await;

    metrics().publish_cycle_finished(outcome, started.elapsed());
    outcome
}

async fn report_failure<T>(target: &mut T, project: &str, failure: &MqttError) -> PublishOutcome
where
    T: PublishTarget + ?Sized,
{
    warn!(error = %failure, "Publish failed, sending error report");

    let report = OutboundMessage::error_report(project, redact_error_report(&failure.to_string()));
    match target.publish(&report).await {
        Ok(()) => PublishOutcome::Reported,
        Err(e) => {
            debug!(error = %e, topic = %report.topic, "Error report could not be published");
            PublishOutcome::Dropped
        }
    }
}
