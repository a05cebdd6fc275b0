//! Data contracts passed between pipeline stages.

/// Stage artifacts, decisions, and run summaries.
pub mod artifact;
/// TOML pipeline configuration.
pub mod config;
/// Tabular records and the single-applicant input.
pub mod record;
/// Declarative column contract.
pub mod schema;

pub use artifact::{
    ClassificationMetric, EvaluationDecision, IncumbentStatus, ModelArtifact, PushArtifact,
    RunStatus, RunSummary, SplitArtifact, TransformationArtifact, ValidationArtifact,
};
pub use config::PipelineConfig;
pub use record::{CustomerRecord, RecordSet};
pub use schema::SchemaRegistry;
