use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{LogFormat, LogLevel, LogRecord, RunLogger};

/// Builder for learning telemetry sinks.
pub struct LearningTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    format: LogFormat,
    min_level: LogLevel,
    console: bool,
}

impl LearningTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            format: LogFormat::Text,
            min_level: LogLevel::Info,
            console: false,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the on-disk format.
    #[must_use]
    pub const fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the minimum level written.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Mirrors records on stderr.
    #[must_use]
    pub const fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<LearningTelemetry> {
        let logger = if let Some(path) = self.log_path {
            Some(RunLogger::with_options(
                path,
                self.format,
                self.min_level,
                self.console,
            )?)
        } else {
            None
        };
        Ok(LearningTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared across learning components.
#[derive(Clone)]
pub struct LearningTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LearningTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<RunLogger>,
}

impl LearningTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LearningTelemetryBuilder {
        LearningTelemetryBuilder::new(module)
    }

    /// Logs a message with structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(&metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Logs an informational message without metadata.
    pub fn info(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Info, message, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("training.log");
        let telemetry = LearningTelemetry::builder("adult-income")
            .log_path(&path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "training.start", json!({ "rows": 10 }))
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "filtered", json!({}))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[INFO] training.start {\"rows\":10}"));
        assert!(!content.contains("filtered"));
    }

    #[test]
    fn telemetry_without_sink_is_silent() {
        let telemetry = LearningTelemetry::builder("quiet").build().unwrap();
        assert!(telemetry.info("nothing").is_ok());
    }
}
