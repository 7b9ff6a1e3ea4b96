//! Line format shared by every sink
//!
//! With the logger at DEBUG or more verbose a line reads
//! `2024-05-01 13:45:12,345 - sensor - rig online`; otherwise the module is
//! left out: `2024-05-01 13:45:12,345 - rig online`.

use crate::protocol::LogRecord;
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// `asctime` layout: local time with comma-separated milliseconds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Field carrying an explicit module name, set by the [`crate::Logger`] helpers
pub const MODULE_FIELD: &str = "module";

/// How records are turned into lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFormat {
    with_module: bool,
}

impl RecordFormat {
    /// Format used by a logger configured at `level`
    pub fn for_level(level: Level) -> Self {
        Self {
            with_module: level >= Level::DEBUG,
        }
    }

    pub fn includes_module(&self) -> bool {
        self.with_module
    }

    pub fn format_line(&self, record: &LogRecord) -> String {
        let asctime = record.timestamp.format(TIMESTAMP_FORMAT);
        if self.with_module {
            format!("{asctime} - {} - {}", record.module, record.message)
        } else {
            format!("{asctime} - {}", record.message)
        }
    }
}

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        writeln!(writer, "{}", self.format_line(&record_from_event(event)))
    }
}

/// Build a record from a tracing event, stamped now
pub fn record_from_event(event: &Event<'_>) -> LogRecord {
    let mut visitor = FieldVisitor::default();
    event.record(&mut visitor);

    let metadata = event.metadata();
    let module = visitor
        .module
        .take()
        .unwrap_or_else(|| module_name(metadata.module_path().unwrap_or(metadata.target())));

    LogRecord::new(*metadata.level(), module, visitor.into_message())
}

/// Last path segment: `rig::sensor::temperature` becomes `temperature`
fn module_name(path: &str) -> String {
    path.rsplit("::").next().unwrap_or(path).to_string()
}

/// Collects the message, an explicit module, and any other fields
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    module: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    /// Message followed by `key=value` pairs for the remaining fields
    fn into_message(self) -> String {
        let mut message = self.message.unwrap_or_default();
        for (key, value) in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            let _ = write!(message, "{key}={value}");
        }
        message
    }

    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            MODULE_FIELD => self.module = Some(value),
            name if name.starts_with("log.") => {}
            name => self.fields.push((name.to_string(), value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.store(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.store(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.store(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}
