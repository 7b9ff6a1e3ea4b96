//! Composite logger construction
//!
//! A [`Logger`] fans every record out to the console, optionally to a
//! timestamped file, and to the broker on `{project}/{name}/log`. Each
//! destination is its own tracing layer; a failure in one never affects the
//! others.
//!
//! ```rust,no_run
//! use mqtt_logging::{make_logger, Destinations};
//! use tracing::Level;
//!
//! let logger = make_logger("bench.rig", &Destinations::console_and_mqtt(), Level::DEBUG)?;
//! logger.info("rig online");
//!
//! logger.in_scope(|| tracing::warn!(temp = 81, "over limit"));
//! logger.flush();
//! # Ok::<(), mqtt_logging::LoggerError>(())
//! ```

use crate::config::LoggingConfig;
use crate::error::{LoggerError, LoggerResult};
use crate::observability::base_filter;
use crate::protocol::TopicBuilder;
use crate::sink::{MqttSink, RecordFormat, SinkGuard, SinkPublisher, SinkSettings};
use crate::transport::mqtt::RumqttcConnector;
use crate::transport::{BrokerConnector, BrokerEndpoint};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::dispatcher::{self, DefaultGuard, Dispatch, SetGlobalDefaultError};
use tracing::{debug, Level};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::{fmt, Registry};

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Suffix of every generated log file name
pub const LOG_FILE_SUFFIX: &str = "TestKit.log";

/// Destinations a logger can write to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    File,
    Mqtt,
}

/// Where a logger writes besides the console and the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub log_to_file: bool,
    /// Directory receiving the log file
    pub output_root: PathBuf,
}

impl Destinations {
    pub fn console_and_mqtt() -> Self {
        Self {
            log_to_file: false,
            output_root: PathBuf::from("data"),
        }
    }

    pub fn with_file(output_root: impl Into<PathBuf>) -> Self {
        Self {
            log_to_file: true,
            output_root: output_root.into(),
        }
    }

    /// Sinks to build, in order
    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        let mut kinds = vec![SinkKind::Console];
        if self.log_to_file {
            kinds.push(SinkKind::File);
        }
        kinds.push(SinkKind::Mqtt);
        kinds
    }
}

impl Default for Destinations {
    fn default() -> Self {
        Self::console_and_mqtt()
    }
}

/// `{YYYYMMDD-HHMMSS}-TestKit.log` for the given moment
pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("{}-{LOG_FILE_SUFFIX}", now.format("%Y%m%d-%H%M%S"))
}

/// Builds loggers sharing one configuration and broker connector
pub struct LoggerFactory {
    config: LoggingConfig,
    endpoint: BrokerEndpoint,
    connector: Arc<dyn BrokerConnector>,
}

impl LoggerFactory {
    /// Validate `config` and prepare the broker endpoint
    pub fn new(config: LoggingConfig) -> LoggerResult<Self> {
        let endpoint = BrokerEndpoint::from_config(&config)?;
        Ok(Self {
            config,
            endpoint,
            connector: Arc::new(RumqttcConnector),
        })
    }

    /// Replace the connector used by the MQTT sink
    pub fn with_connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Destinations rooted at the configured output directory
    pub fn destinations(&self, log_to_file: bool) -> Destinations {
        Destinations {
            log_to_file,
            output_root: self.config.output.root.clone(),
        }
    }

    /// Build a logger named `name` writing at `level` and below
    ///
    /// Dots in `name` become topic levels: `bench.rig` logs to
    /// `{project}/bench/rig/log`.
    pub fn make_logger(
        &self,
        name: &str,
        destinations: &Destinations,
        level: Level,
    ) -> LoggerResult<Logger> {
        if name.trim().is_empty() {
            return Err(LoggerError::invalid_logger("logger name must not be empty"));
        }

        let format = RecordFormat::for_level(level);
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut log_file = None;
        let mut sink_guard = None;

        for kind in destinations.sink_kinds() {
            let layer: BoxedLayer = match kind {
                SinkKind::Console => fmt::layer()
                    .event_format(format)
                    .with_writer(std::io::stderr)
                    .boxed(),
                SinkKind::File => {
                    let path = create_log_file_path(&destinations.output_root)?;
                    let file = OpenOptions::new().create(true).append(true).open(&path)?;
                    log_file = Some(path);
                    fmt::layer()
                        .event_format(format)
                        .with_writer(Mutex::new(file))
                        .boxed()
                }
                SinkKind::Mqtt => {
                    let publisher = SinkPublisher::new(
                        Arc::clone(&self.connector),
                        self.endpoint.clone(),
                        self.config.project.as_str(),
                        name,
                        format,
                    )
                    .with_delivery(self.config.sink.qos, self.config.sink.retain);
                    let (sink, guard) =
                        MqttSink::spawn(publisher, SinkSettings::from(&self.config.sink))?;
                    sink_guard = Some(guard);
                    sink.boxed()
                }
            };
            layers.push(layer);
        }

        let subscriber = tracing_subscriber::registry()
            .with(base_filter(level))
            .with(layers);

        let logger = Logger {
            name: name.to_string(),
            topic: TopicBuilder::log_topic(&self.config.project, name),
            level,
            log_file,
            dispatch: Dispatch::new(subscriber),
            sink_guard,
        };
        debug!(name = %logger.name, topic = %logger.topic, "Logger created");
        Ok(logger)
    }
}

/// Build a logger from environment configuration
///
/// Reads the broker and project settings the way [`LoggingConfig::from_env`]
/// does.
pub fn make_logger(name: &str, destinations: &Destinations, level: Level) -> LoggerResult<Logger> {
    LoggerFactory::new(LoggingConfig::from_env()?)?.make_logger(name, destinations, level)
}

fn create_log_file_path(output_root: &Path) -> LoggerResult<PathBuf> {
    fs::create_dir_all(output_root)?;
    Ok(output_root.join(log_file_name(Local::now())))
}

/// Source module name from a caller location: `src/bench/sensor.rs` gives `sensor`
fn caller_module(location: &Location<'_>) -> String {
    Path::new(location.file())
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.file().to_string())
}

/// A named logger writing to every configured destination
///
/// Dropping the logger publishes whatever the MQTT sink still has queued and
/// stops its worker.
pub struct Logger {
    name: String,
    topic: String,
    level: Level,
    log_file: Option<PathBuf>,
    dispatch: Dispatch,
    sink_guard: Option<SinkGuard>,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic the MQTT sink publishes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Path of the log file, when file output is enabled
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Route this thread's tracing events to the logger until the guard drops
    pub fn set_default(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    /// Run `f` with this logger as the thread's subscriber
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Route every thread's tracing events to the logger
    ///
    /// The logger must outlive its use as global subscriber; once it is
    /// dropped the MQTT sink stops publishing.
    pub fn init_global(&self) -> Result<(), SetGlobalDefaultError> {
        dispatcher::set_global_default(self.dispatch.clone())
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) {
        let module = caller_module(Location::caller());
        self.in_scope(|| tracing::error!(module = %module, "{}", message.as_ref()));
    }

    #[track_caller]
    pub fn warn(&self, message: impl AsRef<str>) {
        let module = caller_module(Location::caller());
        self.in_scope(|| tracing::warn!(module = %module, "{}", message.as_ref()));
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) {
        let module = caller_module(Location::caller());
        self.in_scope(|| tracing::info!(module = %module, "{}", message.as_ref()));
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) {
        let module = caller_module(Location::caller());
        self.in_scope(|| tracing::debug!(module = %module, "{}", message.as_ref()));
    }

    #[track_caller]
    pub fn trace(&self, message: impl AsRef<str>) {
        let module = caller_module(Location::caller());
        self.in_scope(|| tracing::trace!(module = %module, "{}", message.as_ref()));
    }

    /// Block until the MQTT sink has processed everything logged so far
    pub fn flush(&self) {
        if let Some(guard) = &self.sink_guard {
            guard.flush();
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("level", &self.level)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}
