use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    entity::CustomerRecord,
    error::{PipelineError, PipelineResult, Stage},
    estimator::InsuranceModel,
    registry::ModelRegistry,
};

const STAGE: Stage = Stage::Prediction;

/// Result of single-record inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// 1 when the applicant is predicted to be interested.
    pub prediction: u8,
    /// Display label for the prediction.
    pub label: String,
}

impl Prediction {
    fn from_label(prediction: u8) -> Self {
        let label = if prediction == 1 {
            "Response-Yes"
        } else {
            "Response-No"
        };
        Self {
            prediction,
            label: label.to_owned(),
        }
    }
}

/// Serves predictions from the deployed model, loaded on first use and cached until
/// [`PredictionService::reload`].
#[derive(Debug)]
pub struct PredictionService {
    registry: Arc<dyn ModelRegistry>,
    cached: RwLock<Option<Arc<InsuranceModel>>>,
}

impl PredictionService {
    /// Creates the service; the registry is not touched until the first prediction.
    #[must_use]
    pub fn new(registry: Arc<dyn ModelRegistry>) -> Self {
        Self {
            registry,
            cached: RwLock::new(None),
        }
    }

    /// Cached model, loading it from the registry when needed.
    pub fn model(&self) -> PipelineResult<Arc<InsuranceModel>> {
        if let Some(model) = self.cached.read().as_ref() {
            return Ok(Arc::clone(model));
        }
        let mut slot = self.cached.write();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(self.load()?);
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drops the cached model and loads the currently deployed one.
    pub fn reload(&self) -> PipelineResult<()> {
        let model = Arc::new(self.load()?);
        *self.cached.write() = Some(model);
        Ok(())
    }

    /// Forgets the cached model; the next prediction reloads it.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    /// Predicts whether the applicant is interested.
    pub fn predict(&self, record: &CustomerRecord) -> PipelineResult<Prediction> {
        let model = self.model()?;
        let label = model
            .predict_record(record)
            .map_err(|err| PipelineError::invalid(STAGE, format!("{err:#}")))?;
        Ok(Prediction::from_label(label))
    }

    fn load(&self) -> PipelineResult<InsuranceModel> {
        let unavailable = |source| PipelineError::RegistryUnavailable {
            stage: STAGE,
            source,
        };
        if !self.registry.exists().map_err(unavailable)? {
            return Err(unavailable(anyhow::anyhow!(
                "no model deployed at {}",
                self.registry.location()
            )));
        }
        let blob = self.registry.fetch().map_err(unavailable)?;
        InsuranceModel::from_blob(&blob).map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{config::Criterion, schema::tests::insurance_schema},
        fixtures,
        ml::{ForestParams, Preprocessor, RandomForest},
        registry::{FsModelRegistry, ModelBlob},
    };
    use tempfile::tempdir;

    fn model(constant_label: u8) -> InsuranceModel {
        let table = fixtures::insurance_table(60, 2);
        let (features, _) = table.take_column("Response").unwrap();
        let preprocessor = Preprocessor::fit(&insurance_schema(), &features).unwrap();
        let matrix = preprocessor.transform(&features).unwrap();
        let labels = vec![constant_label; matrix.nrows()];
        let params = ForestParams {
            n_estimators: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_depth: Some(3),
            criterion: Criterion::Gini,
            random_state: 1,
        };
        let forest = RandomForest::fit(params, matrix.view(), &labels).unwrap();
        InsuranceModel::new(preprocessor, forest)
    }

    fn record() -> CustomerRecord {
        let table = fixtures::insurance_table(1, 2);
        let (features, _) = table.take_column("Response").unwrap();
        fixtures::customer_record(&features)
    }

    #[test]
    fn missing_model_is_registry_unavailable() {
        let dir = tempdir().unwrap();
        let service = PredictionService::new(Arc::new(FsModelRegistry::new(dir.path(), "m.json")));
        let err = service.predict(&record()).unwrap_err();
        assert_eq!(err.kind(), "registry_unavailable");
    }

    #[test]
    fn caches_until_reload() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(FsModelRegistry::new(dir.path(), "m.json"));
        registry.publish(&model(1).to_blob().unwrap()).unwrap();
        let service = PredictionService::new(registry.clone());
        let first = service.predict(&record()).unwrap();
        assert_eq!(first, Prediction::from_label(1));
        assert_eq!(first.label, "Response-Yes");

        registry.publish(&model(0).to_blob().unwrap()).unwrap();
        assert_eq!(service.predict(&record()).unwrap().prediction, 1);
        service.reload().unwrap();
        assert_eq!(service.predict(&record()).unwrap().prediction, 0);

        registry.publish(&ModelBlob::new(b"garbage".to_vec())).unwrap();
        service.invalidate();
        assert_eq!(
            service.predict(&record()).unwrap_err().kind(),
            "registry_unavailable"
        );
    }
}
