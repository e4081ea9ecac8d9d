#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Append-only run logging shared by the training crates.
//!
//! A [`RunLogger`] writes every accepted [`LogRecord`] to a file opened in
//! append mode and, optionally, mirrors it on stderr. Records are rendered
//! either as human-readable text lines or as JSON lines.

use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

impl LogLevel {
    /// Upper-case label used in text output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Module emitting the log.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary JSON payload for metrics/fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches metadata fields when `metadata` is a JSON object.
    #[must_use]
    pub fn with_metadata(mut self, metadata: &serde_json::Value) -> Self {
        if let Some(obj) = metadata.as_object() {
            self.metadata = obj.clone();
        }
        self
    }

    /// Renders `<local time> [LEVEL] message {metadata}`.
    #[must_use]
    pub fn to_text(&self) -> String {
        let local: DateTime<Local> = DateTime::from(self.timestamp);
        let mut line = format!(
            "{} [{}] {}",
            local.format("%Y-%m-%d %H:%M:%S,%3f"),
            self.level,
            self.message
        );
        if !self.metadata.is_empty() {
            line.push(' ');
            line.push_str(&serde_json::Value::Object(self.metadata.clone()).to_string());
        }
        line
    }
}

/// On-disk rendering of log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One text line per record.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Thread-safe append-only logger with an optional stderr mirror.
#[derive(Debug)]
pub struct RunLogger {
    path: PathBuf,
    format: LogFormat,
    min_level: LogLevel,
    console: bool,
    writer: Mutex<File>,
}

impl RunLogger {
    /// Creates or opens a text logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, LogFormat::Text, LogLevel::Info, false)
    }

    /// Creates or opens a logger with explicit rendering options.
    pub fn with_options(
        path: impl AsRef<Path>,
        format: LogFormat,
        min_level: LogLevel,
        console: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            format,
            min_level,
            console,
            writer: Mutex::new(file),
        })
    }

    /// Writes a record if it meets the minimum level.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let text = record.to_text();
        {
            let mut writer = self.writer.lock();
            match self.format {
                LogFormat::Text => writer.write_all(text.as_bytes())?,
                LogFormat::Json => serde_json::to_writer(&mut *writer, record)?,
            }
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        if self.console {
            eprintln!("{text}");
        }
        Ok(())
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
