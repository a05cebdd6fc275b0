use ndarray::{concatenate, Array1, Array2, Axis};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    entity::{
        config::TransformationConfig, RecordSet, SchemaRegistry, SplitArtifact,
        TransformationArtifact, ValidationArtifact,
    },
    error::{PipelineError, PipelineResult, Stage, StageContext},
    ml::{features::parse_number, Preprocessor, SmoteEnn},
    store::{self, ArtifactStore},
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Transformation;

/// Encodes, scales, and rebalances the partitions.
#[derive(Debug)]
pub struct DataTransformation<'a> {
    config: &'a TransformationConfig,
    schema: &'a SchemaRegistry,
    store: &'a ArtifactStore,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> DataTransformation<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(
        config: &'a TransformationConfig,
        schema: &'a SchemaRegistry,
        store: &'a ArtifactStore,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            config,
            schema,
            store,
            telemetry,
        }
    }

    /// Fits the preprocessor on train, applies it to both partitions, rebalances, and persists
    /// matrices with the label as last column.
    pub fn initiate(
        &self,
        split: &SplitArtifact,
        validation: &ValidationArtifact,
    ) -> PipelineResult<TransformationArtifact> {
        if !validation.status {
            return Err(PipelineError::ValidationGateFailed {
                stage: STAGE,
                message: validation.message.clone(),
            });
        }

        let train = RecordSet::read_csv(&split.train_path)
            .stage_context(STAGE, "reading train partition")?;
        let test =
            RecordSet::read_csv(&split.test_path).stage_context(STAGE, "reading test partition")?;
        let (train_features, train_labels) = split_target(self.schema, &train)?;
        let (test_features, test_labels) = split_target(self.schema, &test)?;

        let preprocessor = Preprocessor::fit(self.schema, &train_features)
            .map_err(|err| PipelineError::invalid(STAGE, format!("fitting preprocessor: {err:#}")))?;
        let train_x = preprocessor
            .transform(&train_features)
            .map_err(|err| PipelineError::invalid(STAGE, format!("encoding train: {err:#}")))?;
        let test_x = preprocessor
            .transform(&test_features)
            .map_err(|err| PipelineError::invalid(STAGE, format!("encoding test: {err:#}")))?;

        let sampler = SmoteEnn::new(
            self.config.smote_neighbors,
            self.config.enn_neighbors,
            self.config.random_state,
        );
        let (train_x, train_y, report) = sampler
            .fit_resample(train_x.view(), &train_labels)
            .stage_context(STAGE, "resampling train partition")?;
        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            "train partition resampled",
            json!({
                "rows_before": train_labels.len(),
                "rows_after": train_y.len(),
                "synthesized": report.synthesized,
                "removed": report.removed,
                "cleaning_skipped": report.cleaning_skipped,
            }),
        );
        let (test_x, test_y) = if self.config.resample_test {
            let (x, y, _) = sampler
                .fit_resample(test_x.view(), &test_labels)
                .stage_context(STAGE, "resampling test partition")?;
            (x, y)
        } else {
            (test_x, test_labels)
        };

        let artifact = TransformationArtifact {
            transformer_object_path: self.store.preprocessor_path(),
            transformed_train_path: self.store.transformed_train_path(),
            transformed_test_path: self.store.transformed_test_path(),
        };
        store::write_json(&artifact.transformer_object_path, &preprocessor)
            .stage_context(STAGE, "persisting preprocessor")?;
        store::write_array(&artifact.transformed_train_path, &with_label(train_x, &train_y)?)
            .stage_context(STAGE, "persisting transformed train")?;
        store::write_array(&artifact.transformed_test_path, &with_label(test_x, &test_y)?)
            .stage_context(STAGE, "persisting transformed test")?;

        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            "transformation finished",
            json!({
                "features": preprocessor.output_columns(),
                "train_rows": train_y.len(),
                "test_rows": test_y.len(),
                "resample_test": self.config.resample_test,
            }),
        );
        Ok(artifact)
    }
}

/// Removes the target column and parses it into {0,1} labels.
pub fn split_target(schema: &SchemaRegistry, table: &RecordSet) -> PipelineResult<(RecordSet, Vec<u8>)> {
    let (features, raw) = table
        .take_column(&schema.target_column)
        .map_err(|err| PipelineError::schema(STAGE, format!("{err:#}")))?;
    let labels = raw
        .iter()
        .enumerate()
        .map(|(row, cell)| match parse_number(cell) {
            Ok(value) if value.abs() < f64::EPSILON => Ok(0),
            Ok(value) if (value - 1.0).abs() < f64::EPSILON => Ok(1),
            _ => Err(PipelineError::invalid(
                STAGE,
                format!("row {row}: target `{cell}` is not 0 or 1"),
            )),
        })
        .collect::<PipelineResult<Vec<u8>>>()?;
    Ok((features, labels))
}

/// Appends labels as the last column.
pub fn with_label(features: Array2<f64>, labels: &[u8]) -> PipelineResult<Array2<f64>> {
    let column = Array1::from_iter(labels.iter().map(|&label| f64::from(label)))
        .insert_axis(Axis(1));
    concatenate(Axis(1), &[features.view(), column.view()])
        .stage_context(STAGE, "appending label column")
}

/// Splits a persisted matrix back into features and labels.
pub fn split_label(matrix: &Array2<f64>) -> PipelineResult<(Array2<f64>, Vec<u8>)> {
    let width = matrix.ncols();
    if width < 2 {
        return Err(PipelineError::invalid(
            STAGE,
            format!("matrix has {width} columns, need features and a label"),
        ));
    }
    let features = matrix.slice(ndarray::s![.., ..width - 1]).to_owned();
    let labels = matrix
        .column(width - 1)
        .iter()
        .map(|&value| u8::from(value >= 0.5))
        .collect();
    Ok((features, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::{ingestion::DataIngestion, validation::DataValidation},
        entity::{config::IngestionConfig, config::SourceConfig, schema::tests::insurance_schema},
        fixtures,
        source::CsvFileSource,
    };
    use chrono::Local;
    use std::path::Path;
    use tempfile::tempdir;

    fn run_until_validation(
        root: &Path,
        rows: usize,
    ) -> (ArtifactStore, SplitArtifact, ValidationArtifact) {
        let data = fixtures::insurance_csv(root, rows, 8);
        let store = ArtifactStore::create(root.join("artifact"), Local::now()).unwrap();
        let schema = insurance_schema();
        let telemetry = PipelineTelemetry::disabled("test");
        let config = IngestionConfig {
            source: SourceConfig::File { path: data.clone() },
            split_ratio: 0.2,
            random_state: 42,
        };
        let split = DataIngestion::new(&config, &schema, &store, &telemetry)
            .initiate(&CsvFileSource::new(&data))
            .unwrap();
        let validation = DataValidation::new(&schema, &store, &telemetry)
            .initiate(&split)
            .unwrap();
        (store, split, validation)
    }

    #[test]
    fn refuses_failed_validation() {
        let dir = tempdir().unwrap();
        let (store, split, mut validation) = run_until_validation(dir.path(), 60);
        validation.status = false;
        validation.message = "test: column count".into();
        let schema = insurance_schema();
        let config = TransformationConfig::default();
        let telemetry = PipelineTelemetry::disabled("test");
        let err = DataTransformation::new(&config, &schema, &store, &telemetry)
            .initiate(&split, &validation)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_gate_failed");
        assert!(err.to_string().contains("test: column count"));
        assert!(!store.preprocessor_path().exists());
    }

    #[test]
    fn persists_labelled_matrices_and_preprocessor() {
        let dir = tempdir().unwrap();
        let (store, split, validation) = run_until_validation(dir.path(), 300);
        let schema = insurance_schema();
        let config = TransformationConfig::default();
        let telemetry = PipelineTelemetry::disabled("test");
        let artifact = DataTransformation::new(&config, &schema, &store, &telemetry)
            .initiate(&split, &validation)
            .unwrap();

        let train = store::read_array(&artifact.transformed_train_path).unwrap();
        let test = store::read_array(&artifact.transformed_test_path).unwrap();
        assert_eq!(train.ncols(), 12);
        assert_eq!(test.dim(), (60, 12));
        let (_, train_labels) = split_label(&train).unwrap();
        let positives = train_labels.iter().filter(|&&l| l == 1).count();
        assert!(positives * 3 > train_labels.len(), "train rebalanced");

        let preprocessor: Preprocessor = store::read_json(&artifact.transformer_object_path).unwrap();
        let raw_test = RecordSet::read_csv(&split.test_path).unwrap();
        let (features, labels) = split_target(&schema, &raw_test).unwrap();
        let (expected_x, expected_y) = split_label(&test).unwrap();
        let actual_x = preprocessor.transform(&features).unwrap();
        assert_eq!(actual_x.dim(), expected_x.dim());
        for (a, b) in actual_x.iter().zip(expected_x.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(labels, expected_y);
    }

    #[test]
    fn resamples_test_partition_when_enabled() {
        let dir = tempdir().unwrap();
        let (store, split, validation) = run_until_validation(dir.path(), 300);
        let schema = insurance_schema();
        let config = TransformationConfig {
            resample_test: true,
            ..TransformationConfig::default()
        };
        let telemetry = PipelineTelemetry::disabled("test");
        let artifact = DataTransformation::new(&config, &schema, &store, &telemetry)
            .initiate(&split, &validation)
            .unwrap();

        let preprocessor: Preprocessor = store::read_json(&artifact.transformer_object_path).unwrap();
        let raw_test = RecordSet::read_csv(&split.test_path).unwrap();
        let (features, labels) = split_target(&schema, &raw_test).unwrap();
        let encoded = preprocessor.transform(&features).unwrap();
        let sampler = SmoteEnn::new(config.smote_neighbors, config.enn_neighbors, config.random_state);
        let (expected_x, expected_y, report) = sampler.fit_resample(encoded.view(), &labels).unwrap();
        assert!(report.synthesized > 0);

        let test = store::read_array(&artifact.transformed_test_path).unwrap();
        let (actual_x, actual_y) = split_label(&test).unwrap();
        assert_ne!(actual_y, labels, "test partition left as sampled");
        assert_eq!(actual_y, expected_y);
        assert_eq!(actual_x.dim(), expected_x.dim());
        for (a, b) in actual_x.iter().zip(expected_x.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn target_must_be_binary() {
        let schema = insurance_schema();
        let table = fixtures::insurance_table(3, 2);
        let mut rows = table.rows().to_vec();
        rows[1][11] = "yes".into();
        let bad = RecordSet::new(table.columns().to_vec(), rows).unwrap();
        let err = split_target(&schema, &bad).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn label_column_round_trips() {
        let features = ndarray::array![[0.5, 1.0], [2.0, 3.0]];
        let labelled = with_label(features.clone(), &[1, 0]).unwrap();
        assert_eq!(labelled.ncols(), 3);
        let (x, y) = split_label(&labelled).unwrap();
        assert_eq!(x, features);
        assert_eq!(y, vec![1, 0]);
    }
}
