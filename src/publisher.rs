//! Ad-hoc data posts over a shared broker session
//!
//! [`DirectPublisher::post`] sends `payload` to `{project}/{subtopic}` at
//! QoS 0. The session is opened on first use and kept for later posts;
//! callers serialize through an async mutex. A session that failed at the
//! transport level is thrown away so the next post reconnects.

use crate::config::LoggingConfig;
use crate::error::LoggerResult;
use crate::protocol::{OutboundMessage, PublishOutcome, QosLevel, TopicBuilder};
use crate::recovery::{publish_with_recovery, PublishTarget};
use crate::transport::mqtt::RumqttcConnector;
use crate::transport::{BrokerConnector, BrokerEndpoint, BrokerSession, FailureKind, MqttError};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

static GLOBAL: OnceCell<DirectPublisher> = OnceCell::new();

/// Publisher for one-off data points
pub struct DirectPublisher {
    connector: Arc<dyn BrokerConnector>,
    endpoint: BrokerEndpoint,
    project: String,
    session: Mutex<Option<Box<dyn BrokerSession>>>,
}

impl DirectPublisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        endpoint: BrokerEndpoint,
        project: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            project: project.into(),
            session: Mutex::new(None),
        }
    }

    /// Publisher talking to the broker described by `config`
    pub fn from_config(config: &LoggingConfig) -> LoggerResult<Self> {
        let endpoint = BrokerEndpoint::from_config(config)?;
        Ok(Self::new(
            Arc::new(RumqttcConnector),
            endpoint,
            config.project.clone(),
        ))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Post `payload` to `{project}/{subtopic}`; never fails
    ///
    /// A wildcard in the resulting topic gets one sanitized retry at QoS 1;
    /// anything else goes to `{project}/error` as a best-effort report.
    pub async fn post(&self, subtopic: &str, payload: &str, retain: bool) -> PublishOutcome {
        let message = OutboundMessage::new(
            TopicBuilder::join(&self.project, subtopic),
            payload,
            QosLevel::AtMostOnce,
            retain,
        );

        let mut slot = self.session.lock().await;
        let mut target = SharedSession {
            connector: self.connector.as_ref(),
            endpoint: &self.endpoint,
            slot: &mut *slot,
        };
        publish_with_recovery(&mut target, &self.project, message).await
    }

    /// Whether a session is currently held open
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Disconnect the shared session; the next post reconnects
    pub async fn close(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.disconnect().await {
                debug!(error = %e, "Disconnect of shared session failed");
            }
        }
    }

    /// Make `publisher` the process-wide instance
    ///
    /// Returns the publisher back if one is already installed.
    pub fn install_global(publisher: DirectPublisher) -> Result<(), DirectPublisher> {
        GLOBAL.set(publisher)
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<&'static DirectPublisher> {
        GLOBAL.get()
    }
}

impl std::fmt::Debug for DirectPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectPublisher")
            .field("endpoint", &self.endpoint.broker_addr())
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

/// Lazily connected session living in the publisher's slot
struct SharedSession<'a> {
    connector: &'a dyn BrokerConnector,
    endpoint: &'a BrokerEndpoint,
    slot: &'a mut Option<Box<dyn BrokerSession>>,
}

#[async_trait]
impl PublishTarget for SharedSession<'_> {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError> {
        if !self.slot.as_ref().is_some_and(|s| s.is_connected()) {
            if let Some(mut stale) = self.slot.take() {
                let _ = stale.disconnect().await;
            }
            *self.slot = Some(self.connector.connect(self.endpoint).await?);
        }

        let Some(session) = self.slot.as_mut() else {
            return Err(MqttError::SessionClosed);
        };

        let result = session.publish(message).await;
        if let Err(e) = &result {
            if e.kind() != FailureKind::InvalidTopic {
                debug!(error = %e, "Discarding shared session after transport failure");
                if let Some(mut broken) = self.slot.take() {
                    let _ = broken.disconnect().await;
                }
            }
        }
        result
    }
}
