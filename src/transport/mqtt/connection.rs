//! Pure connection configuration for MQTT sessions
//!
//! This module turns a [`LoggingConfig`] into a [`BrokerEndpoint`] and an
//! endpoint into rumqttc options for either protocol revision. Nothing in
//! here touches the network.

use crate::config::{ConfigError, LoggingConfig, ProtocolVersion, TransportKind};
use crate::protocol::{QosLevel, TopicBuilder};
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// MQTT session errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid publish topic '{0}': wildcards are not allowed")]
    InvalidTopic(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Session is closed")]
    SessionClosed,
    #[error("MQTT error: {0}")]
    Other(String),
}

/// Failure classes that drive the recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The topic was rejected; sanitizing may fix it
    InvalidTopic,
    /// The broker could not be reached or the connection broke
    Transport,
    Unknown,
}

impl MqttError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MqttError::InvalidTopic(_) => FailureKind::InvalidTopic,
            MqttError::ConnectionFailed(_)
            | MqttError::PublishFailed(_)
            | MqttError::Timeout(_)
            | MqttError::SessionClosed => FailureKind::Transport,
            MqttError::Other(_) => FailureKind::Unknown,
        }
    }
}

/// Last will registered with the broker at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWillMessage {
    pub topic: String,
    pub payload: String,
}

/// Everything needed to open a session, immutable once built
#[derive(Debug, Clone)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: ProtocolVersion,
    pub transport: TransportKind,
    pub keepalive: Duration,
    /// PEM-encoded CA certificate; TLS is enabled when present
    pub tls_ca: Option<Vec<u8>>,
    pub credentials: Option<(String, String)>,
    pub will: Option<LastWillMessage>,
    pub client_id_prefix: String,
    /// Bound on connect, publish and disconnect
    pub timeout: Duration,
    pub websocket_path: String,
}

impl BrokerEndpoint {
    /// Plain TCP endpoint with defaults for everything else
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProtocolVersion::V311,
            transport: TransportKind::Tcp,
            keepalive: Duration::from_secs(60),
            tls_ca: None,
            credentials: None,
            will: None,
            client_id_prefix: "mqtt-logging".to_string(),
            timeout: Duration::from_secs(5),
            websocket_path: "/mqtt".to_string(),
        }
    }

    /// Build an endpoint from configuration, reading TLS material from disk
    pub fn from_config(config: &LoggingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let broker = &config.broker;

        let tls_ca = broker.tls_ca.as_deref().map(read_certificate).transpose()?;

        let will = broker.will.as_ref().map(|payload| LastWillMessage {
            topic: TopicBuilder::sanitize(&TopicBuilder::will_topic(&config.project)),
            payload: payload.clone(),
        });

        let endpoint = Self {
            host: broker.host.clone(),
            port: broker.port,
            protocol: broker.protocol,
            transport: broker.transport,
            keepalive: Duration::from_secs(broker.keepalive_secs),
            tls_ca,
            credentials: broker.credentials(),
            will,
            client_id_prefix: broker
                .client_id_prefix
                .clone()
                .unwrap_or_else(|| format!("{}-log", config.project)),
            timeout: Duration::from_secs(broker.timeout_secs),
            websocket_path: broker.websocket_path.clone(),
        };

        // Websocket endpoints must form a valid URL
        if endpoint.transport == TransportKind::Websockets {
            endpoint.websocket_url()?;
        }

        Ok(endpoint)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Fresh client id for one connection so parallel sessions never collide
    pub fn client_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.client_id_prefix, &suffix[..12])
    }

    /// `ws://` or `wss://` URL for websocket transport
    pub fn websocket_url(&self) -> Result<String, ConfigError> {
        let scheme = if self.tls_ca.is_some() { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))
            .map_err(|e| ConfigError::InvalidConfig(format!("Invalid broker address: {e}")))?;
        url.set_path(&self.websocket_path);
        Ok(url.to_string())
    }

    /// Address handed to rumqttc: the host for TCP, the full URL for websockets
    pub fn broker_addr(&self) -> String {
        match self.transport {
            TransportKind::Tcp => self.host.clone(),
            TransportKind::Websockets => self
                .websocket_url()
                .unwrap_or_else(|_| format!("ws://{}:{}", self.host, self.port)),
        }
    }

    /// Network transport with TLS applied when a CA is configured
    pub fn network_transport(&self) -> RumqttcTransport {
        let tls = self.tls_ca.as_ref().map(|ca| TlsConfiguration::Simple {
            ca: ca.clone(),
            alpn: None,
            client_auth: None,
        });

        match (self.transport, tls) {
            (TransportKind::Tcp, None) => RumqttcTransport::Tcp,
            (TransportKind::Tcp, Some(tls)) => RumqttcTransport::tls_with_config(tls),
            (TransportKind::Websockets, None) => RumqttcTransport::Ws,
            (TransportKind::Websockets, Some(tls)) => RumqttcTransport::wss_with_config(tls),
        }
    }
}

fn read_certificate(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::TlsCertificate {
        path: path.to_path_buf(),
        source,
    })
}

/// Options for an MQTT 3.1.1 session
pub fn configure_v4_options(endpoint: &BrokerEndpoint, client_id: &str) -> rumqttc::MqttOptions {
    let mut options = rumqttc::MqttOptions::new(client_id, endpoint.broker_addr(), endpoint.port);
    options.set_keep_alive(endpoint.keepalive);
    options.set_clean_session(true);
    options.set_transport(endpoint.network_transport());

    if let Some((username, password)) = &endpoint.credentials {
        options.set_credentials(username, password);
    }

    if let Some(will) = &endpoint.will {
        options.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.clone(),
            rumqttc::QoS::AtLeastOnce,
            false,
        ));
    }

    options
}

/// Options for an MQTT 5 session
pub fn configure_v5_options(
    endpoint: &BrokerEndpoint,
    client_id: &str,
) -> rumqttc::v5::MqttOptions {
    let mut options =
        rumqttc::v5::MqttOptions::new(client_id, endpoint.broker_addr(), endpoint.port);
    options.set_keep_alive(endpoint.keepalive);
    options.set_clean_start(true);
    options.set_transport(endpoint.network_transport());

    if let Some((username, password)) = &endpoint.credentials {
        options.set_credentials(username, password);
    }

    if let Some(will) = &endpoint.will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        options.set_last_will(rumqttc::v5::mqttbytes::v5::LastWill::new(
            &will.topic,
            will.payload.clone(),
            rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            false,
            None,
        ));
    }

    options
}

pub fn v4_qos(qos: QosLevel) -> rumqttc::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub fn v5_qos(qos: QosLevel) -> rumqttc::v5::mqttbytes::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}
