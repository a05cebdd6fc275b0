//! Pipeline stages. Each consumes the artifacts of the stages before it and can be rerun on
//! its own.

/// Promotion gate.
pub mod evaluation;
/// Raw data acquisition and train/test split.
pub mod ingestion;
/// Publication of accepted models.
pub mod pusher;
/// Forest fitting and quality floor.
pub mod trainer;
/// Encoding, scaling, rebalancing.
pub mod transformation;
/// Column contract checks.
pub mod validation;

pub use evaluation::ModelEvaluation;
pub use ingestion::DataIngestion;
pub use pusher::ModelPusher;
pub use trainer::ModelTrainer;
pub use transformation::DataTransformation;
pub use validation::DataValidation;
