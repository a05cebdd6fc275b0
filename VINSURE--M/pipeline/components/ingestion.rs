use std::fs;

use rand::seq::SliceRandom;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    entity::{config::IngestionConfig, RecordSet, SchemaRegistry, SplitArtifact},
    error::{PipelineError, PipelineResult, Stage, StageContext},
    source::DataSource,
    store::{temp_sibling, ArtifactStore},
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Ingestion;

/// Fetches the raw table and splits it into train/test partitions.
#[derive(Debug)]
pub struct DataIngestion<'a> {
    config: &'a IngestionConfig,
    schema: &'a SchemaRegistry,
    store: &'a ArtifactStore,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> DataIngestion<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(
        config: &'a IngestionConfig,
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

    /// Runs ingestion against `source`.
    pub fn initiate(&self, source: &dyn DataSource) -> PipelineResult<SplitArtifact> {
        let ratio = self.config.split_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(PipelineError::invalid(
                STAGE,
                format!("split ratio must be in (0, 1), got {ratio}"),
            ));
        }

        let table = source
            .fetch_raw_table()
            .with_stage_context(STAGE, || format!("fetching raw table from {}", source.describe()))?;
        self.check_columns(&table)?;
        let raw_path = self.store.raw_data_path();
        table
            .write_csv(&raw_path)
            .stage_context(STAGE, "persisting raw table")?;

        let (train, test) = split(&table, ratio, self.config.random_state)?;
        let artifact = SplitArtifact {
            raw_path,
            train_path: self.store.train_path(),
            test_path: self.store.test_path(),
            split_ratio: ratio,
            train_rows: train.len(),
            test_rows: test.len(),
        };
        persist_pair(&train, &artifact.train_path, &test, &artifact.test_path)?;

        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            "train/test split persisted",
            json!({
                "source": source.describe(),
                "rows": table.len(),
                "train_rows": artifact.train_rows,
                "test_rows": artifact.test_rows,
                "split_ratio": ratio,
            }),
        );
        Ok(artifact)
    }

    fn check_columns(&self, table: &RecordSet) -> PipelineResult<()> {
        let missing: Vec<&str> = self
            .schema
            .column_names()
            .filter(|name| !table.has_column(name))
            .collect();
        if table.width() != self.schema.column_count() || !missing.is_empty() {
            return Err(PipelineError::schema(
                STAGE,
                format!(
                    "raw table has {} columns, expected {}; missing: [{}]",
                    table.width(),
                    self.schema.column_count(),
                    missing.join(", ")
                ),
            ));
        }
        Ok(())
    }
}

/// Shuffles row indices with the seed; the first `ceil(n * ratio)` rows form the test
/// partition.
pub fn split(table: &RecordSet, ratio: f64, seed: u64) -> PipelineResult<(RecordSet, RecordSet)> {
    let mut indices: Vec<usize> = (0..table.len()).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let test_rows = ((table.len() as f64) * ratio).ceil() as usize;
    let test_rows = test_rows.min(table.len());
    if test_rows == 0 || test_rows == table.len() {
        return Err(PipelineError::invalid(
            STAGE,
            format!(
                "{} rows at ratio {ratio} leave an empty partition",
                table.len()
            ),
        ));
    }
    let (test_idx, train_idx) = indices.split_at(test_rows);
    Ok((table.select_rows(train_idx), table.select_rows(test_idx)))
}

/// Writes both partitions to temporary siblings and renames them only when both are complete.
/// A failed second rename takes the first partition back out.
fn persist_pair(
    train: &RecordSet,
    train_path: &std::path::Path,
    test: &RecordSet,
    test_path: &std::path::Path,
) -> PipelineResult<()> {
    let train_tmp = temp_sibling(train_path);
    let test_tmp = temp_sibling(test_path);
    let written = train
        .write_csv(&train_tmp)
        .and_then(|()| test.write_csv(&test_tmp))
        .and_then(|()| fs::rename(&train_tmp, train_path).map_err(Into::into))
        .and_then(|()| {
            fs::rename(&test_tmp, test_path).map_err(|err| {
                let _ = fs::remove_file(train_path);
                anyhow::Error::from(err)
            })
        });
    if written.is_err() {
        let _ = fs::remove_file(&train_tmp);
        let _ = fs::remove_file(&test_tmp);
    }
    written.stage_context(STAGE, "persisting train/test partitions")
}
