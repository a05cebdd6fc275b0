#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Vehicle-insurance interest training pipeline: artifact-chained stages, a promotion gate in
//! front of a single-slot model registry, and a prediction service over the deployed model.

/// Typed artifacts, configuration, schema, and tabular records.
#[path = "../entity/main.rs"]
pub mod entity;

/// Feature engineering, scaling, resampling, the forest classifier, and metrics.
#[path = "../ML/main.rs"]
pub mod ml;

/// Pipeline stages.
#[path = "../components/main.rs"]
pub mod components;

/// Stage-tagged error type.
#[path = "../error.rs"]
pub mod error;

/// Per-run artifact directories and the run index.
#[path = "../store.rs"]
pub mod store;

/// Raw data sources.
#[path = "../source.rs"]
pub mod source;

/// Deployed-model storage.
#[path = "../registry.rs"]
pub mod registry;

/// Run log and `tracing` mirroring.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Preprocessor plus classifier, persisted as one object.
#[path = "../estimator.rs"]
pub mod estimator;

/// Inference over the deployed model.
#[path = "../prediction.rs"]
pub mod prediction;

/// Run orchestrator.
#[path = "../pipeline.rs"]
pub mod pipeline;

#[cfg(test)]
#[path = "../fixtures.rs"]
mod fixtures;

/// Prelude exports for binaries driving the pipeline.
pub mod prelude {
    pub use crate::entity::{
        CustomerRecord, EvaluationDecision, PipelineConfig, RunStatus, RunSummary,
    };
    pub use crate::error::{PipelineError, PipelineResult, Stage};
    pub use crate::pipeline::{run_from_config, RunOutcome, TrainingPipeline};
    pub use crate::prediction::{Prediction, PredictionService};
    pub use crate::registry::{FsModelRegistry, ModelRegistry};
    pub use crate::store::{read_run_summaries, ArtifactStore};
}
