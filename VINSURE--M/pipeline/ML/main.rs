//! Learning primitives: feature encoding, scaling, resampling, the forest, and scoring.

/// Categorical encoding of raw feature tables.
pub mod features;
/// Random forest classifier.
pub mod forest;
/// Binary classification scores.
pub mod metrics;
/// Exact nearest-neighbour search.
pub mod neighbors;
/// Fitted encoding plus scaling, persisted with the model.
pub mod preprocess;
/// SMOTE-ENN class rebalancing.
pub mod resample;
/// Standard and min-max column scaling.
pub mod scaling;

pub use forest::{ForestParams, RandomForest};
pub use metrics::classification_metric;
pub use preprocess::Preprocessor;
pub use resample::SmoteEnn;
