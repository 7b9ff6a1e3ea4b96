//! Crate-level error type and error-report redaction
//!
//! Errors that reach the caller come only from construction: loading
//! configuration, building an endpoint, opening the log file. Everything that
//! happens while emitting is recovered inside the pipeline and turned into an
//! error report instead (see [`redact_error_report`]).

use crate::config::ConfigError;
use crate::transport::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Longest error report published to `{project}/error`
pub const MAX_REPORT_LEN: usize = 500;

/// Main error type for building loggers and publishers
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid logger: {message}")]
    InvalidLogger { message: String },
}

impl LoggerError {
    /// Create invalid logger error
    pub fn invalid_logger<S: Into<String>>(message: S) -> Self {
        Self::InvalidLogger {
            message: message.into(),
        }
    }
}

/// Result type for logger construction
pub type LoggerResult<T> = Result<T, LoggerError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").expect("secret pattern")
});

static URL_CREDENTIALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^/\s:@]+:[^/\s@]+@").expect("url credentials pattern"));

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("sensitive path pattern")
});

/// Strip credentials from a failure description before it goes to the broker
///
/// Error reports are retained on `{project}/error`, so anything a late
/// subscriber could read is redacted and the text is capped at
/// [`MAX_REPORT_LEN`] bytes.
pub fn redact_error_report(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = URL_CREDENTIALS
        .replace_all(&sanitized, "://***@")
        .to_string();

    sanitized = SENSITIVE_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_REPORT_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_REPORT_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}
