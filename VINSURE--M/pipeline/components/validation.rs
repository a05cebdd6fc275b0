use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    entity::{RecordSet, SchemaRegistry, SplitArtifact, ValidationArtifact},
    error::{PipelineResult, Stage, StageContext},
    store::{self, ArtifactStore},
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Validation;

#[derive(Serialize)]
struct ValidationReport<'a> {
    validation_status: bool,
    message: &'a str,
}

/// Checks both partitions against the schema's column contract.
#[derive(Debug)]
pub struct DataValidation<'a> {
    schema: &'a SchemaRegistry,
    store: &'a ArtifactStore,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> DataValidation<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(
        schema: &'a SchemaRegistry,
        store: &'a ArtifactStore,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            schema,
            store,
            telemetry,
        }
    }

    /// Validates both partitions. Check failures are reported in the artifact; only I/O and
    /// parse failures are errors.
    pub fn initiate(&self, split: &SplitArtifact) -> PipelineResult<ValidationArtifact> {
        let train = RecordSet::read_csv(&split.train_path)
            .stage_context(STAGE, "reading train partition")?;
        let test =
            RecordSet::read_csv(&split.test_path).stage_context(STAGE, "reading test partition")?;

        let mut failures = Vec::new();
        for (partition, table) in [("train", &train), ("test", &test)] {
            for (check, detail) in check_table(self.schema, table) {
                failures.push(format!("{partition}: {check}: {detail}"));
            }
        }
        let artifact = ValidationArtifact {
            status: failures.is_empty(),
            message: failures.join("; "),
            report_path: self.store.validation_report_path(),
        };

        let report = ValidationReport {
            validation_status: artifact.status,
            message: &artifact.message,
        };
        if let Err(err) = store::write_json(&artifact.report_path, &report) {
            let _ = self.telemetry.log(
                STAGE,
                LogLevel::Warn,
                "validation report not written",
                json!({ "path": artifact.report_path, "error": format!("{err:#}") }),
            );
        }

        let level = if artifact.status {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let _ = self.telemetry.log(
            STAGE,
            level,
            "validation finished",
            json!({ "status": artifact.status, "message": artifact.message }),
        );
        Ok(artifact)
    }
}

/// Runs every column check on one table, in a fixed order, without short-circuiting.
/// Returns the failed checks with a description each.
#[must_use]
pub fn check_table(schema: &SchemaRegistry, table: &RecordSet) -> IndexMap<&'static str, String> {
    let mut failed = IndexMap::new();
    if table.width() != schema.column_count() {
        failed.insert(
            "column count",
            format!("expected {}, found {}", schema.column_count(), table.width()),
        );
    }
    let missing = |columns: &[String]| -> Vec<String> {
        columns
            .iter()
            .filter(|column| !table.has_column(column))
            .cloned()
            .collect()
    };
    let numerical = missing(schema.numerical_columns.as_slice());
    if !numerical.is_empty() {
        failed.insert(
            "numerical columns",
            format!("missing [{}]", numerical.join(", ")),
        );
    }
    let categorical = missing(schema.categorical_columns.as_slice());
    if !categorical.is_empty() {
        failed.insert(
            "categorical columns",
            format!("missing [{}]", categorical.join(", ")),
        );
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::ingestion::split, entity::schema::tests::insurance_schema, fixtures,
    };
    use chrono::Local;
    use tempfile::tempdir;

    fn split_artifact(store: &ArtifactStore, train: &RecordSet, test: &RecordSet) -> SplitArtifact {
        train.write_csv(store.train_path()).unwrap();
        test.write_csv(store.test_path()).unwrap();
        SplitArtifact {
            raw_path: store.raw_data_path(),
            train_path: store.train_path(),
            test_path: store.test_path(),
            split_ratio: 0.2,
            train_rows: train.len(),
            test_rows: test.len(),
        }
    }

    #[test]
    fn conforming_partitions_pass_and_report_is_written() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), Local::now()).unwrap();
        let (train, test) = split(&fixtures::insurance_table(50, 1), 0.2, 1).unwrap();
        let split = split_artifact(&store, &train, &test);
        let schema = insurance_schema();
        let telemetry = PipelineTelemetry::disabled("test");
        let artifact = DataValidation::new(&schema, &store, &telemetry)
            .initiate(&split)
            .unwrap();
        assert!(artifact.status);
        assert!(artifact.message.is_empty());
        let report: serde_json::Value = store::read_json(&artifact.report_path).unwrap();
        assert_eq!(report, json!({ "validation_status": true, "message": "" }));
    }

    #[test]
    fn every_failed_check_is_listed() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), Local::now()).unwrap();
        let (train, test) = split(&fixtures::insurance_table(50, 1), 0.2, 1).unwrap();
        let (test, _) = test.take_column("Age").unwrap();
        let (test, _) = test.take_column("Vehicle_Damage").unwrap();
        let split = split_artifact(&store, &train, &test);
        let schema = insurance_schema();
        let telemetry = PipelineTelemetry::disabled("test");
        let artifact = DataValidation::new(&schema, &store, &telemetry)
            .initiate(&split)
            .unwrap();
        assert!(!artifact.status);
        assert!(artifact.message.contains("test: column count"));
        assert!(artifact.message.contains("test: numerical columns: missing [Age]"));
        assert!(artifact.message.contains("test: categorical columns: missing [Vehicle_Damage]"));
        assert!(!artifact.message.contains("train:"));
    }

    #[test]
    fn count_check_fails_alone_on_extra_column() {
        let schema = insurance_schema();
        let table = fixtures::insurance_table(5, 1);
        let mut columns = table.columns().to_vec();
        columns.push("extra".into());
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.push("x".into());
                row
            })
            .collect();
        let wide = RecordSet::new(columns, rows).unwrap();
        let failed = check_table(&schema, &wide);
        assert_eq!(failed.keys().copied().collect::<Vec<_>>(), ["column count"]);
    }

    #[test]
    fn missing_partition_is_an_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), Local::now()).unwrap();
        let split = SplitArtifact {
            raw_path: store.raw_data_path(),
            train_path: store.train_path(),
            test_path: store.test_path(),
            split_ratio: 0.2,
            train_rows: 0,
            test_rows: 0,
        };
        let schema = insurance_schema();
        let telemetry = PipelineTelemetry::disabled("test");
        let err = DataValidation::new(&schema, &store, &telemetry)
            .initiate(&split)
            .unwrap_err();
        assert_eq!(err.kind(), "io_failure");
    }
}
