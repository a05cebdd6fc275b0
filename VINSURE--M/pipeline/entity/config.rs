use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Complete pipeline configuration, loaded once and passed by reference to every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Run-wide paths and naming.
    pub pipeline: PipelineSection,
    /// Ingestion settings.
    pub ingestion: IngestionConfig,
    /// Transformation settings.
    #[serde(default)]
    pub transformation: TransformationConfig,
    /// Classifier hyperparameters and quality gate.
    pub trainer: TrainerConfig,
    /// Promotion gate settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Deployed-model registry location.
    pub registry: RegistryConfig,
}

impl PipelineConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later in the run.
    pub fn validate(&self) -> Result<()> {
        let ratio = self.ingestion.split_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            bail!("ingestion.split_ratio must be in (0, 1), got {ratio}");
        }
        ensure!(
            self.transformation.smote_neighbors > 0,
            "transformation.smote_neighbors must be positive"
        );
        ensure!(
            self.transformation.enn_neighbors > 0,
            "transformation.enn_neighbors must be positive"
        );
        let trainer = &self.trainer;
        ensure!(trainer.n_estimators > 0, "trainer.n_estimators must be positive");
        ensure!(
            trainer.min_samples_split >= 2,
            "trainer.min_samples_split must be at least 2"
        );
        ensure!(
            trainer.min_samples_leaf > 0,
            "trainer.min_samples_leaf must be positive"
        );
        if trainer.max_depth == Some(0) {
            bail!("trainer.max_depth must be positive when set");
        }
        ensure!(
            (0.0..=1.0).contains(&trainer.expected_accuracy),
            "trainer.expected_accuracy must be in [0, 1], got {}",
            trainer.expected_accuracy
        );
        ensure!(
            self.evaluation.min_improvement >= 0.0,
            "evaluation.min_improvement must not be negative"
        );
        ensure!(!self.registry.key.trim().is_empty(), "registry.key must not be empty");
        Ok(())
    }
}

/// Paths shared by the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Pipeline name, recorded in run summaries.
    pub name: String,
    /// Root under which per-run artifact directories are created.
    pub artifact_root: PathBuf,
    /// Directory holding one JSON-lines log per run.
    pub log_dir: PathBuf,
    /// Schema registry document.
    pub schema_path: PathBuf,
}

/// Where raw data comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Local CSV file.
    File {
        /// CSV path.
        path: PathBuf,
    },
    /// Remote CSV downloaded once into a cache file.
    Url {
        /// Download URL.
        url: String,
        /// Local copy; the download is skipped when it already exists.
        cache_path: PathBuf,
    },
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    /// Raw data source.
    pub source: SourceConfig,
    /// Fraction of rows assigned to the test partition.
    pub split_ratio: f64,
    /// Shuffle seed.
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

/// Transformation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformationConfig {
    /// Resampling seed.
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    /// Also resample the test partition (off by default: it biases evaluation metrics).
    #[serde(default)]
    pub resample_test: bool,
    /// Neighbours used to synthesise minority samples.
    #[serde(default = "default_smote_neighbors")]
    pub smote_neighbors: usize,
    /// Neighbours consulted when editing noisy samples.
    #[serde(default = "default_enn_neighbors")]
    pub enn_neighbors: usize,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            random_state: default_random_state(),
            resample_test: false,
            smote_neighbors: default_smote_neighbors(),
            enn_neighbors: default_enn_neighbors(),
        }
    }
}

/// Split quality measure for the decision trees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Gini impurity.
    #[default]
    Gini,
    /// Shannon entropy.
    Entropy,
}

/// Classifier hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    /// Number of trees.
    pub n_estimators: usize,
    /// Minimum samples required to split a node.
    pub min_samples_split: usize,
    /// Minimum samples in each leaf.
    pub min_samples_leaf: usize,
    /// Depth limit; unlimited when absent.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Impurity measure.
    #[serde(default)]
    pub criterion: Criterion,
    /// Forest seed.
    pub random_state: u64,
    /// Minimum training accuracy for the model to be kept.
    pub expected_accuracy: f64,
}

/// Promotion gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    /// F1 margin the new model must beat the incumbent by. Zero means strict improvement.
    #[serde(default)]
    pub min_improvement: f64,
}

/// Deployed-model registry location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Bucket directory.
    pub bucket: PathBuf,
    /// Object key of the single deployed model.
    pub key: String,
}

const fn default_random_state() -> u64 {
    42
}

const fn default_smote_neighbors() -> usize {
    5
}

const fn default_enn_neighbors() -> usize {
    3
}
