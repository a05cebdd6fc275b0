use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use crate::error::Stage;

/// Builder for pipeline telemetry sinks.
pub struct PipelineTelemetryBuilder {
    component: String,
    logger: Option<JsonLogger>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            logger: None,
        }
    }

    /// Sends records to a JSON-lines run log.
    #[must_use]
    pub fn logger(mut self, logger: JsonLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the telemetry handle.
    #[must_use]
    pub fn build(self) -> PipelineTelemetry {
        PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                logger: self.logger,
            }),
        }
    }
}

/// Telemetry handle shared by every stage of a run. Records go to the run log (when one is
/// configured) and to `tracing`.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("component", &self.inner.component)
            .field(
                "log_path",
                &self.inner.logger.as_ref().map(JsonLogger::path),
            )
            .finish()
    }
}

struct TelemetryInner {
    component: String,
    logger: Option<JsonLogger>,
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(component)
    }

    /// Handle that only mirrors to `tracing`.
    #[must_use]
    pub fn disabled(component: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: component.into(),
                logger: None,
            }),
        }
    }

    /// Logs a stage record with structured metadata.
    pub fn log(&self, stage: Stage, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        mirror(stage, level, message, &metadata);
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.component, level, message)
                .with_stage(stage.as_str())
                .with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Run log path, if any.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.inner
            .logger
            .as_ref()
            .map(|logger| logger.path().to_path_buf())
    }
}

fn mirror(stage: Stage, level: LogLevel, message: &str, metadata: &Value) {
    let stage = stage.as_str();
    match level {
        LogLevel::Debug => tracing::debug!(stage, %metadata, "{message}"),
        LogLevel::Info => tracing::info!(stage, %metadata, "{message}"),
        LogLevel::Warn => tracing::warn!(stage, %metadata, "{message}"),
        LogLevel::Error => tracing::error!(stage, %metadata, "{message}"),
    }
}
