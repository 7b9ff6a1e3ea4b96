//! Diagnostics for the crate itself
//!
//! The binary calls [`init_default_logging`] at startup. The MQTT sink worker
//! installs [`worker_subscriber`] as its thread default, so a broker outage
//! shows up as warnings on stderr and never as more records for the sink.
//!
//! Environment:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE
//! - `LOG_FORMAT`: `json` (default), `pretty` or `compact`
//! - `LOG_SPANS`: `true` adds span open/close events
//! - `RUST_LOG`: full filter directive, replaces the level filter
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG mqtt-logging emit "rig online"
//! LOG_FORMAT=compact mqtt-logging config --show
//! ```

use crate::config::parse_level;
use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_LOG_SPANS: &str = "LOG_SPANS";

/// Filter for `level` with dependency noise held at `warn`
pub fn base_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_lowercase();
    EnvFilter::new(format!("{level},rumqttc=warn,tokio=warn"))
}

/// `LOG_LEVEL` as seen through `lookup`, or `default` when unset or unknown
pub fn env_level<F>(lookup: F, default: Level) -> Level
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_LOG_LEVEL)
        .and_then(|level| parse_level(&level).ok())
        .unwrap_or(default)
}

/// Subscriber for threads that must not log through the MQTT sink
///
/// Writes compact lines to stderr at `LOG_LEVEL`, WARN when unset.
pub fn worker_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let level = env_level(|name| env::var(name).ok(), Level::WARN);

    tracing_subscriber::registry().with(base_filter(level)).with(
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false),
    )
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single line, colored
    Compact,
}

impl LogFormat {
    /// Parse a format name; anything unknown is JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Install the process-wide subscriber for the crate's own diagnostics
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| base_filter(level));

    let spans = if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let output: Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer().json().with_span_events(spans).boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(false)
            .with_span_events(spans)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(output).init();
}

/// [`init_logging`] configured from `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() {
    let lookup = |name: &str| env::var(name).ok();

    let level = env_level(lookup, Level::INFO);
    let format = LogFormat::parse(&lookup(ENV_LOG_FORMAT).unwrap_or_default());
    let include_spans = lookup(ENV_LOG_SPANS).is_some_and(|v| v.eq_ignore_ascii_case("true"));

    init_logging(level, format, include_spans);
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::debug_span!("mqtt_operation", $($field)*)
    };
}

pub use mqtt_span;
