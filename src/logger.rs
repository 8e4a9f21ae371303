//! Leveled logging capability injected into every component.
//!
//! This module provides the [`Logger`] trait that the handshake client, the
//! upgrader, the connection manager and every session call into.  There is no
//! process-wide logger: callers construct one and hand it over as an
//! `Arc<dyn Logger>`, which lets tests inject a [`CapturingLogger`].

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Severity of a log record, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    /// The four-letter tag written in logfmt output.
    pub fn tag(&self) -> &'static str {
        match self {
            Level::Debug => "dbug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "eror",
            Level::Critical => "crit",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" | "dbug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" | "eror" => Ok(Level::Error),
            "critical" | "crit" => Ok(Level::Critical),
            _ => Err(format!(
                "Invalid log level: {s}. Valid options: debug, info, warn, error, critical"
            )),
        }
    }
}

/// Structured key/value arguments attached to a record.
pub type Fields<'a> = &'a [(&'a str, &'a dyn fmt::Display)];

/// A leveled, append-only log sink.
///
/// Implementations must be callable from any task concurrently.  Only
/// [`log`](Logger::log) is required; the per-level methods forward to it.
///
/// # Example
///
/// ```rust
/// use alarmie::{Logger, NullLogger};
///
/// let logger = NullLogger;
/// let team = "acme";
/// logger.info("connected", &[("team", &team)]);
/// ```
pub trait Logger: Send + Sync {
    /// Record one message at `level` with structured fields.
    fn log(&self, level: Level, message: &str, fields: Fields<'_>);

    fn debug(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Error, message, fields);
    }

    fn critical(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Critical, message, fields);
    }
}

/// Discards every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _: Level, _: &str, _: Fields<'_>) {}
}

/// Writes one logfmt line per record to the wrapped writer.
///
/// Lines look like `t=2024-05-01T10:00:00Z lvl=info msg="connected" team=acme`.
/// Records below the minimum level are dropped.  Write failures are ignored;
/// logging never fails the caller.
pub struct LogfmtLogger<W: Write + Send> {
    writer: Mutex<W>,
    min_level: Level,
}

impl<W: Write + Send> LogfmtLogger<W> {
    /// Create a logger that records everything.
    pub fn new(writer: W) -> Self {
        Self::with_min_level(writer, Level::Debug)
    }

    /// Create a logger that drops records below `min_level`.
    pub fn with_min_level(writer: W, min_level: Level) -> Self {
        Self {
            writer: Mutex::new(writer),
            min_level,
        }
    }

    /// Consume the logger and return the writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> Logger for LogfmtLogger<W> {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>) {
        if level < self.min_level {
            return;
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let line = format_record(&timestamp, level, message, fields);
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }
}

/// A single captured record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl Record {
    /// Returns the rendered value of the named field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    records: Mutex<Vec<Record>>,
}

impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the records captured so far.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns true if any message or field value contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|record| {
            record.message.contains(needle)
                || record
                    .fields
                    .iter()
                    .any(|(k, v)| k.contains(needle) || v.contains(needle))
        })
    }
}

impl Logger for CapturingLogger {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>) {
        let record = Record {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}

fn format_record(timestamp: &str, level: Level, message: &str, fields: Fields<'_>) -> String {
    let mut line = format!("t={timestamp} lvl={level} msg={}", quote(message));
    for (key, value) in fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&quote(&value.to_string()));
    }
    line
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c == ' ' || c == '=' || c == '"' || c.is_control());
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
