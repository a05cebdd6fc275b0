use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    components::transformation::split_label,
    entity::{config::TrainerConfig, ModelArtifact, TransformationArtifact},
    error::{PipelineError, PipelineResult, Stage, StageContext},
    estimator::InsuranceModel,
    ml::{classification_metric, metrics::accuracy, ForestParams, Preprocessor, RandomForest},
    store::{self, ArtifactStore},
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Training;

/// Fits the forest on the transformed training matrix and enforces the accuracy floor.
#[derive(Debug)]
pub struct ModelTrainer<'a> {
    config: &'a TrainerConfig,
    store: &'a ArtifactStore,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> ModelTrainer<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(
        config: &'a TrainerConfig,
        store: &'a ArtifactStore,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            config,
            store,
            telemetry,
        }
    }

    /// Trains, scores on the test matrix, and persists the model with its preprocessor.
    /// Nothing is written when training accuracy is below the configured floor.
    pub fn initiate(&self, transformation: &TransformationArtifact) -> PipelineResult<ModelArtifact> {
        let train = store::read_array(&transformation.transformed_train_path)
            .stage_context(STAGE, "reading transformed train")?;
        let test = store::read_array(&transformation.transformed_test_path)
            .stage_context(STAGE, "reading transformed test")?;
        let preprocessor: Preprocessor = store::read_json(&transformation.transformer_object_path)
            .stage_context(STAGE, "reading preprocessor")?;
        let (train_x, train_y) = split_label(&train)?;
        let (test_x, test_y) = split_label(&test)?;

        let forest = RandomForest::fit(ForestParams::from(self.config), train_x.view(), &train_y)
            .map_err(|err| PipelineError::invalid(STAGE, format!("fitting forest: {err:#}")))?;
        let train_accuracy = accuracy(
            &train_y,
            &forest
                .predict(train_x.view())
                .stage_context(STAGE, "scoring train matrix")?,
        );
        let predicted = forest
            .predict(test_x.view())
            .stage_context(STAGE, "scoring test matrix")?;
        let metric = classification_metric(&test_y, &predicted);

        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            "forest fitted",
            json!({
                "trees": forest.n_trees(),
                "features": forest.n_features(),
                "max_depth": forest.max_tree_depth(),
                "train_accuracy": train_accuracy,
                "test_metric": metric,
            }),
        );
        if train_accuracy < self.config.expected_accuracy {
            return Err(PipelineError::ModelBelowThreshold {
                stage: STAGE,
                accuracy: train_accuracy,
                expected: self.config.expected_accuracy,
            });
        }

        let artifact = ModelArtifact {
            trained_model_path: self.store.model_path(),
            metric,
        };
        InsuranceModel::new(preprocessor, forest)
            .save(&artifact.trained_model_path)
            .stage_context(STAGE, "persisting trained model")?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::transformation::with_label,
        entity::{config::Criterion, schema::tests::insurance_schema},
        fixtures,
    };
    use chrono::Local;
    use ndarray::Array2;
    use rand::Rng;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
    use tempfile::tempdir;

    fn trainer_config(expected_accuracy: f64) -> TrainerConfig {
        TrainerConfig {
            n_estimators: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_depth: Some(8),
            criterion: Criterion::Gini,
            random_state: 5,
            expected_accuracy,
        }
    }

    /// Persists a preprocessor and labelled matrices for the trainer to consume.
    fn transformation(store: &ArtifactStore, labels: impl Fn(usize, &Array2<f64>) -> u8) -> TransformationArtifact {
        let table = fixtures::insurance_table(200, 4);
        let (features, _) = table.take_column("Response").unwrap();
        let preprocessor = Preprocessor::fit(&insurance_schema(), &features).unwrap();
        let matrix = preprocessor.transform(&features).unwrap();
        let y: Vec<u8> = (0..matrix.nrows()).map(|idx| labels(idx, &matrix)).collect();
        let artifact = TransformationArtifact {
            transformer_object_path: store.preprocessor_path(),
            transformed_train_path: store.transformed_train_path(),
            transformed_test_path: store.transformed_test_path(),
        };
        store::write_json(&artifact.transformer_object_path, &preprocessor).unwrap();
        let labelled = with_label(matrix, &y).unwrap();
        store::write_array(&artifact.transformed_train_path, &labelled).unwrap();
        store::write_array(&artifact.transformed_test_path, &labelled).unwrap();
        artifact
    }

    #[test]
    fn learnable_labels_produce_a_model() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), Local::now()).unwrap();
        // Column 0 is standardised Age; the label is whether the applicant is older than average.
        let artifact = transformation(&store, |idx, m| u8::from(m[[idx, 0]] > 0.0));
        let config = trainer_config(0.6);
        let telemetry = PipelineTelemetry::disabled("test");
        let model = ModelTrainer::new(&config, &store, &telemetry)
            .initiate(&artifact)
            .unwrap();
        assert!(model.metric.accuracy > 0.9);
        assert!(model.metric.f1 > 0.9);
        let loaded = InsuranceModel::load(&model.trained_model_path).unwrap();
        assert_eq!(loaded.classifier().n_trees(), 10);
        assert_eq!(loaded.classifier().n_features(), 11);
    }

    #[test]
    fn random_labels_below_threshold_write_nothing() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), Local::now()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let noise: Vec<u8> = (0..200).map(|_| u8::from(rng.gen_bool(0.5))).collect();
        let artifact = transformation(&store, |idx, _| noise[idx]);
        let config = TrainerConfig {
            n_estimators: 1,
            max_depth: Some(1),
            ..trainer_config(0.99)
        };
        let telemetry = PipelineTelemetry::disabled("test");
        let err = ModelTrainer::new(&config, &store, &telemetry)
            .initiate(&artifact)
            .unwrap_err();
        assert_eq!(err.kind(), "model_below_threshold");
        assert_eq!(err.stage(), Stage::Training);
        assert!(!store.model_path().exists());
    }
}
