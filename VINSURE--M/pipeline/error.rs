use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage an error or log record originates from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Pipeline construction (config, schema, run directories).
    Setup,
    /// Raw data acquisition and train/test split.
    Ingestion,
    /// Schema conformance checks.
    Validation,
    /// Feature encoding and resampling.
    Transformation,
    /// Classifier fitting and quality gate.
    Training,
    /// Comparison against the deployed model.
    Evaluation,
    /// Publication of an accepted model.
    Pusher,
    /// Single-record inference.
    Prediction,
}

impl Stage {
    /// Stable lowercase name used in logs and run summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Ingestion => "ingestion",
            Self::Validation => "validation",
            Self::Transformation => "transformation",
            Self::Training => "training",
            Self::Evaluation => "evaluation",
            Self::Pusher => "pusher",
            Self::Prediction => "prediction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by pipeline stages. Every variant names the stage it came from.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The table does not honour the schema's column contract.
    #[error("[{stage}] schema mismatch: {detail}")]
    SchemaMismatch {
        /// Originating stage.
        stage: Stage,
        /// Which columns disagree.
        detail: String,
    },
    /// Transformation was asked to run on data that failed validation.
    #[error("[{stage}] validation gate failed: {message}")]
    ValidationGateFailed {
        /// Originating stage.
        stage: Stage,
        /// Validation message carried over from the validation artifact.
        message: String,
    },
    /// The trained model does not reach the configured minimum accuracy.
    #[error("[{stage}] model below threshold: training accuracy {accuracy:.4} < expected {expected:.4}")]
    ModelBelowThreshold {
        /// Originating stage.
        stage: Stage,
        /// Training-set accuracy achieved.
        accuracy: f64,
        /// Configured minimum.
        expected: f64,
    },
    /// The model registry could not be reached or holds no usable model.
    #[error("[{stage}] model registry unavailable: {source:#}")]
    RegistryUnavailable {
        /// Originating stage.
        stage: Stage,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
    /// Bad caller input: ratios, empty partitions, unparseable cells.
    #[error("[{stage}] invalid input: {detail}")]
    InvalidInput {
        /// Originating stage.
        stage: Stage,
        /// Description of the offending input.
        detail: String,
    },
    /// Persistence or parsing failure.
    #[error("[{stage}] {context}: {source:#}")]
    Io {
        /// Originating stage.
        stage: Stage,
        /// What was being attempted.
        context: String,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Stage the error originated from.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::SchemaMismatch { stage, .. }
            | Self::ValidationGateFailed { stage, .. }
            | Self::ModelBelowThreshold { stage, .. }
            | Self::RegistryUnavailable { stage, .. }
            | Self::InvalidInput { stage, .. }
            | Self::Io { stage, .. } => *stage,
        }
    }

    /// Short machine-readable kind, used in run summaries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::ValidationGateFailed { .. } => "validation_gate_failed",
            Self::ModelBelowThreshold { .. } => "model_below_threshold",
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Io { .. } => "io_failure",
        }
    }

    /// Builds a [`PipelineError::SchemaMismatch`].
    pub fn schema(stage: Stage, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            stage,
            detail: detail.into(),
        }
    }

    /// Builds a [`PipelineError::InvalidInput`].
    pub fn invalid(stage: Stage, detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            detail: detail.into(),
        }
    }
}

/// Result alias used by stage entry points.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Attaches stage and context to fallible persistence calls, turning them into
/// [`PipelineError::Io`].
pub trait StageContext<T> {
    /// Wraps the error with a fixed context string.
    fn stage_context(self, stage: Stage, context: &str) -> PipelineResult<T>;

    /// Wraps the error with a lazily built context string.
    fn with_stage_context<F>(self, stage: Stage, context: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> StageContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn stage_context(self, stage: Stage, context: &str) -> PipelineResult<T> {
        self.map_err(|err| PipelineError::Io {
            stage,
            context: context.to_owned(),
            source: err.into(),
        })
    }

    fn with_stage_context<F>(self, stage: Stage, context: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| PipelineError::Io {
            stage,
            context: context(),
            source: err.into(),
        })
    }
}
