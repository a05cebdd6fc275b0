use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{CustomerRecord, RecordSet},
    ml::{Preprocessor, RandomForest},
    registry::ModelBlob,
    store,
};

/// Deployable model: the fitted preprocessor and the classifier it feeds. Loading one value
/// reproduces train-time preprocessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsuranceModel {
    preprocessor: Preprocessor,
    classifier: RandomForest,
}

impl InsuranceModel {
    /// Pairs a preprocessor with a classifier fitted on its output.
    #[must_use]
    pub const fn new(preprocessor: Preprocessor, classifier: RandomForest) -> Self {
        Self {
            preprocessor,
            classifier,
        }
    }

    /// Predicts labels for a raw feature table (label column removed).
    pub fn predict(&self, features: &RecordSet) -> Result<Vec<u8>> {
        let matrix = self.preprocessor.transform(features)?;
        self.classifier.predict(matrix.view())
    }

    /// Predicts the label of one applicant.
    pub fn predict_record(&self, record: &CustomerRecord) -> Result<u8> {
        let matrix = self.preprocessor.transform_record(record)?;
        let labels = self.classifier.predict(matrix.view())?;
        labels
            .first()
            .copied()
            .context("classifier returned no prediction")
    }

    /// Fitted classifier.
    #[must_use]
    pub const fn classifier(&self) -> &RandomForest {
        &self.classifier
    }

    /// Serializes the model for the registry.
    pub fn to_blob(&self) -> Result<ModelBlob> {
        Ok(ModelBlob::new(serde_json::to_vec(self)?))
    }

    /// Restores a model from registry bytes.
    pub fn from_blob(blob: &ModelBlob) -> Result<Self> {
        serde_json::from_slice(blob.as_bytes()).context("decoding model blob")
    }

    /// Writes the model as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        store::write_json(path, self)
    }

    /// Reads a model written by [`InsuranceModel::save`].
    pub fn load(path: &Path) -> Result<Self> {
        store::read_json(path)
    }
}
