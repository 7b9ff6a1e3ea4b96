//! Impure I/O operations for MQTT sessions
//!
//! Each session owns a rumqttc client and its event loop and drives the loop
//! inline: connect waits for CONNACK, publish waits for the packet (QoS 0),
//! PUBACK (QoS 1) or PUBCOMP (QoS 2), disconnect waits for DISCONNECT to go
//! out. Every wait is bounded by the endpoint timeout.

use super::connection::{
    configure_v4_options, configure_v5_options, v4_qos, v5_qos, BrokerEndpoint, MqttError,
};
use crate::config::ProtocolVersion;
use crate::observability::metrics;
use crate::protocol::{OutboundMessage, QosLevel, TopicBuilder};
use crate::transport::{BrokerConnector, BrokerSession};
use async_trait::async_trait;
use rumqttc::Outgoing;
use std::time::Duration;
use tracing::{debug, trace};

/// Connector producing real broker sessions for either protocol revision
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttcConnector;

#[async_trait]
impl BrokerConnector for RumqttcConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerSession>, MqttError> {
        let collector = metrics();
        collector.mqtt_connection_attempt();

        let session: Result<Box<dyn BrokerSession>, MqttError> = match endpoint.protocol {
            ProtocolVersion::V311 => V4Session::open(endpoint)
                .await
                .map(|s| Box::new(s) as Box<dyn BrokerSession>),
            ProtocolVersion::V5 => V5Session::open(endpoint)
                .await
                .map(|s| Box::new(s) as Box<dyn BrokerSession>),
        };

        if session.is_err() {
            collector.mqtt_connection_failed();
        }
        session
    }
}

/// Reject wildcard topics before anything reaches the client library
fn check_topic(message: &OutboundMessage) -> Result<(), MqttError> {
    if TopicBuilder::has_wildcard(&message.topic) {
        return Err(MqttError::InvalidTopic(message.topic.clone()));
    }
    Ok(())
}

/// Where a session's network link stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    /// Connected and able to publish
    Open,
    /// A publish went unanswered; the socket may still be up
    Stalled,
    /// The event loop failed, the socket is gone
    Broken,
    /// DISCONNECT was sent or there was nothing left to close
    Closed,
}

impl LinkState {
    /// State after a failed publish
    fn after_failure(error: &MqttError) -> Self {
        match error {
            MqttError::Timeout(_) => LinkState::Stalled,
            _ => LinkState::Broken,
        }
    }

    /// Whether closing must still send DISCONNECT so the broker keeps the will
    fn needs_disconnect(self) -> bool {
        matches!(self, LinkState::Open | LinkState::Stalled)
    }
}

/// MQTT 3.1.1 session
pub struct V4Session {
    client: rumqttc::AsyncClient,
    event_loop: rumqttc::EventLoop,
    timeout: Duration,
    state: LinkState,
}

impl V4Session {
    /// Connect and wait for CONNACK
    pub async fn open(endpoint: &BrokerEndpoint) -> Result<Self, MqttError> {
        let client_id = endpoint.client_id();
        let options = configure_v4_options(endpoint, &client_id);
        let (client, event_loop) = rumqttc::AsyncClient::new(options, 10);

        let mut session = Self {
            client,
            event_loop,
            timeout: endpoint.timeout,
            state: LinkState::Broken,
        };

        session
            .drive(|event| {
                matches!(
                    event,
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))
                )
            })
            .await
            .map_err(|e| match e {
                MqttError::PublishFailed(source) => MqttError::ConnectionFailed(source),
                other => other,
            })?;

        session.state = LinkState::Open;
        debug!(client_id = %client_id, host = %endpoint.host, port = endpoint.port, "MQTT 3.1.1 session open");
        Ok(session)
    }

    /// Poll the event loop until `done` accepts an event
    async fn drive<F>(&mut self, mut done: F) -> Result<(), MqttError>
    where
        F: FnMut(&rumqttc::Event) -> bool + Send,
    {
        let timeout = self.timeout;
        let event_loop = &mut self.event_loop;

        tokio::time::timeout(timeout, async {
            loop {
                let event = event_loop
                    .poll()
                    .await
                    .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
                trace!(?event, "MQTT event");
                if done(&event) {
                    return Ok::<(), MqttError>(());
                }
            }
        })
        .await
        .map_err(|_| MqttError::Timeout(timeout))?
    }
}

#[async_trait]
impl BrokerSession for V4Session {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError> {
        if self.state != LinkState::Open {
            return Err(MqttError::SessionClosed);
        }
        check_topic(message)?;

        let qos = message.qos;
        self.client
            .publish(
                message.topic.as_str(),
                v4_qos(qos),
                message.retain,
                message.payload.as_bytes().to_vec(),
            )
            .await
            .map_err(|e| {
                self.state = LinkState::Broken;
                MqttError::PublishFailed(Box::new(e))
            })?;

        let result = self
            .drive(|event| match (qos, event) {
                (QosLevel::AtMostOnce, rumqttc::Event::Outgoing(Outgoing::Publish(_))) => true,
                (
                    QosLevel::AtLeastOnce,
                    rumqttc::Event::Incoming(rumqttc::Packet::PubAck(_)),
                ) => true,
                (
                    QosLevel::ExactlyOnce,
                    rumqttc::Event::Incoming(rumqttc::Packet::PubComp(_)),
                ) => true,
                _ => false,
            })
            .await;

        match &result {
            Ok(()) => metrics().mqtt_message_published(),
            Err(e) => {
                metrics().mqtt_publish_failed();
                self.state = LinkState::after_failure(e);
            }
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let state = std::mem::replace(&mut self.state, LinkState::Closed);
        if !state.needs_disconnect() {
            return Ok(());
        }

        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Other(format!("Disconnect request failed: {e}")))?;

        // The broker closing the socket right after DISCONNECT also ends the session
        if let Err(e) = self
            .drive(|event| matches!(event, rumqttc::Event::Outgoing(Outgoing::Disconnect)))
            .await
        {
            debug!(error = %e, "Event loop ended while disconnecting");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Open
    }
}

/// MQTT 5 session
pub struct V5Session {
    client: rumqttc::v5::AsyncClient,
    event_loop: rumqttc::v5::EventLoop,
    timeout: Duration,
    state: LinkState,
}

impl V5Session {
    /// Connect and wait for CONNACK
    pub async fn open(endpoint: &BrokerEndpoint) -> Result<Self, MqttError> {
        let client_id = endpoint.client_id();
        let options = configure_v5_options(endpoint, &client_id);
        let (client, event_loop) = rumqttc::v5::AsyncClient::new(options, 10);

        let mut session = Self {
            client,
            event_loop,
            timeout: endpoint.timeout,
            state: LinkState::Broken,
        };

        session
            .drive(|event| {
                matches!(
                    event,
                    rumqttc::v5::Event::Incoming(rumqttc::v5::mqttbytes::v5::Packet::ConnAck(_))
                )
            })
            .await
            .map_err(|e| match e {
                MqttError::PublishFailed(source) => MqttError::ConnectionFailed(source),
                other => other,
            })?;

        session.state = LinkState::Open;
        debug!(client_id = %client_id, host = %endpoint.host, port = endpoint.port, "MQTT 5 session open");
        Ok(session)
    }

    async fn drive<F>(&mut self, mut done: F) -> Result<(), MqttError>
    where
        F: FnMut(&rumqttc::v5::Event) -> bool + Send,
    {
        let timeout = self.timeout;
        let event_loop = &mut self.event_loop;

        tokio::time::timeout(timeout, async {
            loop {
                let event = event_loop
                    .poll()
                    .await
                    .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
                trace!(?event, "MQTT v5 event");
                if done(&event) {
                    return Ok::<(), MqttError>(());
                }
            }
        })
        .await
        .map_err(|_| MqttError::Timeout(timeout))?
    }
}

#[async_trait]
impl BrokerSession for V5Session {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError> {
        use rumqttc::v5::mqttbytes::v5::Packet;
        use rumqttc::v5::Event;

        if self.state != LinkState::Open {
            return Err(MqttError::SessionClosed);
        }
        check_topic(message)?;

        let qos = message.qos;
        self.client
            .publish(
                message.topic.as_str(),
                v5_qos(qos),
                message.retain,
                bytes::Bytes::from(message.payload.clone()),
            )
            .await
            .map_err(|e| {
                self.state = LinkState::Broken;
                MqttError::PublishFailed(Box::new(e))
            })?;

        let result = self
            .drive(|event| match (qos, event) {
                (QosLevel::AtMostOnce, Event::Outgoing(Outgoing::Publish(_))) => true,
                (QosLevel::AtLeastOnce, Event::Incoming(Packet::PubAck(_))) => true,
                (QosLevel::ExactlyOnce, Event::Incoming(Packet::PubComp(_))) => true,
                _ => false,
            })
            .await;

        match &result {
            Ok(()) => metrics().mqtt_message_published(),
            Err(e) => {
                metrics().mqtt_publish_failed();
                self.state = LinkState::after_failure(e);
            }
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let state = std::mem::replace(&mut self.state, LinkState::Closed);
        if !state.needs_disconnect() {
            return Ok(());
        }

        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Other(format!("Disconnect request failed: {e}")))?;

        if let Err(e) = self
            .drive(|event| {
                matches!(
                    event,
                    rumqttc::v5::Event::Outgoing(Outgoing::Disconnect)
                )
            })
            .await
        {
            debug!(error = %e, "Event loop ended while disconnecting");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Open
    }
}
