use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Stage;

/// Output of ingestion: the raw snapshot and two disjoint partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitArtifact {
    /// Raw table as fetched from the source.
    pub raw_path: PathBuf,
    /// Training partition CSV.
    pub train_path: PathBuf,
    /// Test partition CSV.
    pub test_path: PathBuf,
    /// Fraction of rows assigned to test.
    pub split_ratio: f64,
    /// Rows in the training partition.
    pub train_rows: usize,
    /// Rows in the test partition.
    pub test_rows: usize,
}

/// Output of validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationArtifact {
    /// True iff every check passed on both partitions.
    pub status: bool,
    /// Concatenated failure descriptions; empty when valid.
    pub message: String,
    /// Where the JSON report was (or would have been) written.
    pub report_path: PathBuf,
}

/// Output of transformation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformationArtifact {
    /// Fitted preprocessor.
    pub transformer_object_path: PathBuf,
    /// Training matrix with the label as last column.
    pub transformed_train_path: PathBuf,
    /// Test matrix with the label as last column.
    pub transformed_test_path: PathBuf,
}

/// Binary classification scores, positive class = 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassificationMetric {
    /// Share of correct predictions.
    pub accuracy: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// True positives over predicted positives.
    pub precision: f64,
    /// True positives over actual positives.
    pub recall: f64,
}

/// Output of training.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    /// Serialized [`crate::estimator::InsuranceModel`].
    pub trained_model_path: PathBuf,
    /// Scores on the test partition.
    pub metric: ClassificationMetric,
}

/// What the evaluation stage found in the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncumbentStatus {
    /// No model deployed yet.
    Absent,
    /// Deployed model loaded and scored on the test partition.
    Scored,
    /// Deployed model could not be fetched or scored; the gate failed open.
    Unreadable {
        /// Cause, as rendered from the underlying error.
        reason: String,
    },
}

impl fmt::Display for IncumbentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Scored => f.write_str("scored"),
            Self::Unreadable { reason } => write!(f, "unreadable ({reason})"),
        }
    }
}

/// Output of the promotion gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationDecision {
    /// F1 of the newly trained model.
    pub trained_score: f64,
    /// F1 of the deployed model; zero when there is none or it was unreadable.
    pub incumbent_score: f64,
    /// Whether the trained model should be published.
    pub accepted: bool,
    /// Absolute F1 difference; zero when nothing was compared.
    pub score_delta: f64,
    /// State of the deployed model during comparison.
    pub incumbent: IncumbentStatus,
}

/// Output of the pusher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushArtifact {
    /// True when the trained model replaced the deployed one.
    pub published: bool,
    /// Registry location of the deployed model.
    pub registry_location: String,
}

/// Final state of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Trained model was accepted and published.
    Promoted,
    /// Trained model did not beat the deployed one.
    Rejected,
    /// A stage returned an error.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Promoted => "promoted",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        })
    }
}

/// One line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Run identifier (the artifact directory name).
    pub run_id: String,
    /// Pipeline name from configuration.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Outcome.
    pub status: RunStatus,
    /// Stage that failed, for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    /// Error kind and message, for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Promotion decision, when evaluation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<EvaluationDecision>,
    /// Per-run artifact directory.
    pub artifact_dir: PathBuf,
}
