//! Configuration for MQTT log forwarding
//!
//! Configuration comes from an optional TOML file with environment variable
//! overrides on top. Every section has defaults, so an empty file (or no file
//! at all, via [`LoggingConfig::from_env`]) is a valid configuration pointing
//! at `localhost:1884`.

use crate::protocol::QosLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable overriding the broker host
pub const ENV_HOST: &str = "AWSIP";
/// Environment variable overriding the broker port
pub const ENV_PORT: &str = "AWSPORT";
pub const ENV_PROJECT: &str = "MQTT_LOG_PROJECT";
pub const ENV_TRANSPORT: &str = "MQTT_LOG_TRANSPORT";
pub const ENV_PROTOCOL: &str = "MQTT_LOG_PROTOCOL";
pub const ENV_KEEPALIVE: &str = "MQTT_LOG_KEEPALIVE";
pub const ENV_TLS_CA: &str = "MQTT_LOG_TLS_CA";
pub const ENV_AUTH: &str = "MQTT_LOG_AUTH";
pub const ENV_WILL: &str = "MQTT_LOG_WILL";
pub const ENV_OUTPUT: &str = "MQTT_LOG_OUTPUT";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Project namespace, the first level of every topic
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub sink: SinkSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default)]
    pub transport: TransportKind,
    /// Keepalive interval in seconds (default: 60)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Path to a PEM CA certificate; enables TLS when set
    pub tls_ca: Option<PathBuf>,
    /// Credentials as `username:password`
    pub auth: Option<String>,
    /// Last will payload published on `{project}/will`
    pub will: Option<String>,
    /// Client id prefix; a random suffix is appended per connection
    pub client_id_prefix: Option<String>,
    /// Bound on every connect, publish and disconnect (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Request path for websocket transport (default: `/mqtt`)
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
}

/// MQTT sink behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkSection {
    #[serde(default = "default_sink_qos")]
    pub qos: QosLevel,
    #[serde(default = "default_sink_retain")]
    pub retain: bool,
    /// Records buffered between the application and the publish worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub backpressure: Backpressure,
}

/// Console and file output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSection {
    /// Directory receiving timestamped log files
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
    /// Level name: ERROR, WARN, INFO, DEBUG or TRACE
    #[serde(default = "default_level")]
    pub level: String,
}

/// MQTT protocol revision spoken to the broker
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProtocolVersion {
    #[default]
    #[serde(rename = "3.1.1", alias = "4", alias = "v4")]
    V311,
    #[serde(rename = "5", alias = "v5")]
    V5,
}

impl FromStr for ProtocolVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "3.1.1" | "4" | "v4" | "mqttv311" => Ok(ProtocolVersion::V311),
            "5" | "v5" | "mqttv5" => Ok(ProtocolVersion::V5),
            other => Err(ConfigError::InvalidConfig(format!(
                "Unknown MQTT protocol version '{other}'"
            ))),
        }
    }
}

/// Network transport under the MQTT session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Websockets,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "websockets" | "websocket" | "ws" => Ok(TransportKind::Websockets),
            other => Err(ConfigError::InvalidConfig(format!(
                "Unknown transport '{other}', expected 'tcp' or 'websockets'"
            ))),
        }
    }
}

/// What the MQTT sink does when its queue is full
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Drop the new record and count it
    #[default]
    Drop,
    /// Block the emitting thread until there is room
    Block,
}

fn default_project() -> String {
    "DVT".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1884
}

fn default_keepalive() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_websocket_path() -> String {
    "/mqtt".to_string()
}

fn default_sink_qos() -> QosLevel {
    QosLevel::AtLeastOnce
}

fn default_sink_retain() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_output_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_level() -> String {
    "DEBUG".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            broker: BrokerSection::default(),
            sink: SinkSection::default(),
            output: OutputSection::default(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: ProtocolVersion::default(),
            transport: TransportKind::default(),
            keepalive_secs: default_keepalive(),
            tls_ca: None,
            auth: None,
            will: None,
            client_id_prefix: None,
            timeout_secs: default_timeout_secs(),
            websocket_path: default_websocket_path(),
        }
    }
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            qos: default_sink_qos(),
            retain: default_sink_retain(),
            queue_capacity: default_queue_capacity(),
            backpressure: Backpressure::default(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            level: default_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnvVar { name: String, value: String },
    #[error("Failed to read TLS certificate {path}: {source}")]
    TlsCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoggingConfig {
    /// Load configuration from TOML file, apply environment overrides, validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: LoggingConfig = toml::from_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = LoggingConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup, normally the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.broker.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.broker.port = parse_env(ENV_PORT, &port)?;
        }
        if let Some(project) = lookup(ENV_PROJECT) {
            self.project = project;
        }
        if let Some(transport) = lookup(ENV_TRANSPORT) {
            self.broker.transport = transport.parse()?;
        }
        if let Some(protocol) = lookup(ENV_PROTOCOL) {
            self.broker.protocol = protocol.parse()?;
        }
        if let Some(keepalive) = lookup(ENV_KEEPALIVE) {
            self.broker.keepalive_secs = parse_env(ENV_KEEPALIVE, &keepalive)?;
        }
        if let Some(ca) = lookup(ENV_TLS_CA) {
            self.broker.tls_ca = Some(PathBuf::from(ca));
        }
        if let Some(auth) = lookup(ENV_AUTH) {
            self.broker.auth = Some(auth);
        }
        if let Some(will) = lookup(ENV_WILL) {
            self.broker.will = Some(will);
        }
        if let Some(root) = lookup(ENV_OUTPUT) {
            self.output.root = PathBuf::from(root);
        }
        Ok(())
    }

    /// Check field consistency; file-level checks (TLS material) happen when
    /// the broker endpoint is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "project namespace must not be empty".to_string(),
            ));
        }
        self.broker.validate()?;
        if self.sink.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "sink.queue_capacity must be greater than zero".to_string(),
            ));
        }
        parse_level(&self.output.level)?;
        Ok(())
    }

    /// Configured output level
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        parse_level(&self.output.level)
    }

    /// `requested` when given, the configured output level otherwise
    pub fn effective_level(&self, requested: Option<&str>) -> Result<tracing::Level, ConfigError> {
        match requested {
            Some(level) => parse_level(level),
            None => self.level(),
        }
    }

    /// Copy safe to print: the password part of `broker.auth` is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some((user, _)) = self.broker.credentials() {
            config.broker.auth = Some(format!("{user}:***"));
        }
        config
    }
}

impl BrokerSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must not be 0".to_string(),
            ));
        }
        if self.keepalive_secs != 0 && self.keepalive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "broker.keepalive_secs must be 0 or at least 5".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(auth) = &self.auth {
            if !auth.contains(':') {
                return Err(ConfigError::InvalidConfig(
                    "broker.auth must have the form 'username:password'".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Split `auth` into username and password
    pub fn credentials(&self) -> Option<(String, String)> {
        self.auth.as_ref().and_then(|auth| {
            auth.split_once(':')
                .map(|(user, pass)| (user.to_string(), pass.to_string()))
        })
    }
}

/// Parse a level name the way tracing does, case-insensitively
pub fn parse_level(level: &str) -> Result<tracing::Level, ConfigError> {
    tracing::Level::from_str(level.trim()).map_err(|_| ConfigError::InvalidLevel(level.to_string()))
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.project, "DVT");
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.broker.protocol, ProtocolVersion::V311);
        assert_eq!(config.broker.transport, TransportKind::Tcp);
        assert_eq!(config.broker.keepalive_secs, 60);
        assert_eq!(config.sink.qos, QosLevel::AtLeastOnce);
        assert!(config.sink.retain);
        assert_eq!(config.sink.backpressure, Backpressure::Drop);
        assert_eq!(config.output.root, PathBuf::from("data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: LoggingConfig = toml::from_str("").unwrap();
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_full_toml() {
        let toml_content = r#"
project = "OTK"

[broker]
host = "broker.internal"
port = 8883
protocol = "5"
transport = "websockets"
keepalive_secs = 30
auth = "runner:hunter2"
will = "runner offline"

[sink]
qos = 2
retain = false
queue_capacity = 16
backpressure = "block"

[output]
root = "/tmp/logs"
level = "INFO"
"#;

        let config: LoggingConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.project, "OTK");
        assert_eq!(config.broker.host, "broker.internal");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.protocol, ProtocolVersion::V5);
        assert_eq!(config.broker.transport, TransportKind::Websockets);
        assert_eq!(config.broker.will.as_deref(), Some("runner offline"));
        assert_eq!(config.sink.qos, QosLevel::ExactlyOnce);
        assert!(!config.sink.retain);
        assert_eq!(config.sink.backpressure, Backpressure::Block);
        assert_eq!(config.level().unwrap(), tracing::Level::INFO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_qos_rejected_by_parser() {
        let result: Result<LoggingConfig, _> = toml::from_str("[sink]\nqos = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LoggingConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_HOST, "10.0.0.5"),
                (ENV_PORT, "3003"),
                (ENV_PROJECT, "OTK"),
                (ENV_TRANSPORT, "websockets"),
                (ENV_PROTOCOL, "5"),
                (ENV_AUTH, "user:pass"),
                (ENV_OUTPUT, "/var/log/otk"),
            ]))
            .unwrap();

        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 3003);
        assert_eq!(config.project, "OTK");
        assert_eq!(config.broker.transport, TransportKind::Websockets);
        assert_eq!(config.broker.protocol, ProtocolVersion::V5);
        assert_eq!(
            config.broker.credentials(),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(config.output.root, PathBuf::from("/var/log/otk"));
    }

    #[test]
    fn test_invalid_port_env() {
        let mut config = LoggingConfig::default();
        let result = config.apply_overrides(lookup(&[(ENV_PORT, "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_invalid_transport_env() {
        let mut config = LoggingConfig::default();
        let result = config.apply_overrides(lookup(&[(ENV_TRANSPORT, "carrier-pigeon")]));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = LoggingConfig::default();
        config.broker.port = 0;
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.broker.host = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.project = String::new();
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.broker.auth = Some("no-separator".to_string());
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.broker.keepalive_secs = 2;
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.sink.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LoggingConfig::default();
        config.output.level = "LOUD".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLevel(_))));
    }

    #[test]
    fn test_credentials_keep_colons_in_password() {
        let section = BrokerSection {
            auth: Some("user:pa:ss".to_string()),
            ..Default::default()
        };
        assert_eq!(
            section.credentials(),
            Some(("user".to_string(), "pa:ss".to_string()))
        );
    }

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("debug").unwrap(), tracing::Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), tracing::Level::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_effective_level_prefers_request() {
        let mut config = LoggingConfig::default();
        config.output.level = "ERROR".to_string();

        assert_eq!(config.effective_level(None).unwrap(), tracing::Level::ERROR);
        assert_eq!(
            config.effective_level(Some("trace")).unwrap(),
            tracing::Level::TRACE
        );
        assert!(matches!(
            config.effective_level(Some("LOUD")),
            Err(ConfigError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_redacted_masks_password() {
        let mut config = LoggingConfig::default();
        config.broker.auth = Some("runner:hunter2".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.broker.auth.as_deref(), Some("runner:***"));
        assert_eq!(redacted.broker.host, config.broker.host);

        let rendered = toml::to_string_pretty(&redacted).unwrap();
        assert!(!rendered.contains("hunter2"));

        // Nothing to mask
        assert_eq!(LoggingConfig::default().redacted(), LoggingConfig::default());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("3.1.1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V311);
        assert_eq!("MQTTv5".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V5);
        assert!("6".parse::<ProtocolVersion>().is_err());
    }
}
