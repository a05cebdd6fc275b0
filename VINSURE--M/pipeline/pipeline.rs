//! Run orchestration: one artifact directory, one log, stages in order.

use std::sync::Arc;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::{JsonLogger, LogLevel};

use crate::{
    components::{
        DataIngestion, DataTransformation, DataValidation, ModelEvaluation, ModelPusher,
        ModelTrainer,
    },
    entity::{
        EvaluationDecision, ModelArtifact, PipelineConfig, PushArtifact, RunStatus, RunSummary,
        SchemaRegistry, SplitArtifact, TransformationArtifact, ValidationArtifact,
    },
    error::{PipelineResult, Stage, StageContext},
    registry::{FsModelRegistry, ModelRegistry},
    source::{self, DataSource},
    store::{self, ArtifactStore},
    telemetry::PipelineTelemetry,
};

/// What a completed run decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Artifact directory name of the run.
    pub run_id: String,
    /// Promotion gate result.
    pub decision: EvaluationDecision,
    /// Whether the registry was updated.
    pub push: PushArtifact,
}

impl RunOutcome {
    /// Promoted when the trained model was published.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        if self.push.published {
            RunStatus::Promoted
        } else {
            RunStatus::Rejected
        }
    }
}

/// Drives one training run. Every stage is also exposed on its own so a failed step can be
/// retried with the artifacts of the steps before it.
#[derive(Debug)]
pub struct TrainingPipeline {
    config: PipelineConfig,
    schema: SchemaRegistry,
    store: ArtifactStore,
    telemetry: PipelineTelemetry,
    source: Box<dyn DataSource>,
    registry: Arc<dyn ModelRegistry>,
}

impl TrainingPipeline {
    /// Loads the schema, claims a run directory, and opens the run log.
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        let section = &config.pipeline;
        let schema = SchemaRegistry::load(&section.schema_path)
            .stage_context(Stage::Setup, "loading schema registry")?;
        let store = ArtifactStore::create(&section.artifact_root, Local::now())
            .stage_context(Stage::Setup, "creating run directory")?;
        let logger = JsonLogger::for_run(&section.log_dir, store.run_id()).with_stage_context(
            Stage::Setup,
            || format!("opening run log in {}", section.log_dir.display()),
        )?;
        let telemetry = PipelineTelemetry::builder(section.name.clone())
            .logger(logger)
            .build();
        Ok(Self {
            source: source::from_config(&config.ingestion.source),
            registry: Arc::new(FsModelRegistry::from_config(&config.registry)),
            config: config.clone(),
            schema,
            store,
            telemetry,
        })
    }

    /// Replaces the configured data source.
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn DataSource>) -> Self {
        self.source = source;
        self
    }

    /// Replaces the configured model registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.store.run_id()
    }

    /// Artifact store of this run.
    #[must_use]
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Telemetry handle of this run.
    #[must_use]
    pub const fn telemetry(&self) -> &PipelineTelemetry {
        &self.telemetry
    }

    /// Registry the pusher publishes to.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn ModelRegistry> {
        Arc::clone(&self.registry)
    }

    /// Fetches, checks, and splits the raw table.
    pub fn start_data_ingestion(&self) -> PipelineResult<SplitArtifact> {
        DataIngestion::new(&self.config.ingestion, &self.schema, &self.store, &self.telemetry)
            .initiate(self.source.as_ref())
    }

    /// Validates both partitions against the schema.
    pub fn start_data_validation(&self, split: &SplitArtifact) -> PipelineResult<ValidationArtifact> {
        DataValidation::new(&self.schema, &self.store, &self.telemetry).initiate(split)
    }

    /// Fits the preprocessor and writes model-ready matrices.
    pub fn start_data_transformation(
        &self,
        split: &SplitArtifact,
        validation: &ValidationArtifact,
    ) -> PipelineResult<TransformationArtifact> {
        DataTransformation::new(
            &self.config.transformation,
            &self.schema,
            &self.store,
            &self.telemetry,
        )
        .initiate(split, validation)
    }

    /// Trains and persists the classifier.
    pub fn start_model_trainer(
        &self,
        transformation: &TransformationArtifact,
    ) -> PipelineResult<ModelArtifact> {
        ModelTrainer::new(&self.config.trainer, &self.store, &self.telemetry).initiate(transformation)
    }

    /// Compares the trained model against the deployed one.
    #[must_use]
    pub fn start_model_evaluation(
        &self,
        model: &ModelArtifact,
        split: &SplitArtifact,
    ) -> EvaluationDecision {
        ModelEvaluation::new(
            &self.config.evaluation,
            &self.schema,
            self.registry.as_ref(),
            &self.telemetry,
        )
        .initiate(model, split)
    }

    /// Publishes the trained model when the decision accepted it.
    pub fn start_model_pusher(
        &self,
        model: &ModelArtifact,
        decision: &EvaluationDecision,
    ) -> PipelineResult<PushArtifact> {
        ModelPusher::new(self.registry.as_ref(), &self.telemetry).initiate(model, decision)
    }

    /// Runs every stage and records the run in the index, whatever the result.
    pub fn run(&self) -> PipelineResult<RunOutcome> {
        let started_at = Utc::now();
        let _ = self.telemetry.log(
            Stage::Setup,
            LogLevel::Info,
            "run started",
            json!({ "run_id": self.run_id(), "artifact_dir": self.store.run_dir() }),
        );
        let result = self.run_stages();

        let mut summary = RunSummary {
            run_id: self.run_id().to_owned(),
            pipeline: self.config.pipeline.name.clone(),
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::Failed,
            failed_stage: None,
            error: None,
            decision: None,
            artifact_dir: self.store.run_dir().to_path_buf(),
        };
        match &result {
            Ok(outcome) => {
                summary.status = outcome.status();
                summary.decision = Some(outcome.decision.clone());
            }
            Err(err) => {
                summary.failed_stage = Some(err.stage());
                summary.error = Some(format!("{}: {err}", err.kind()));
                let _ = self.telemetry.log(
                    err.stage(),
                    LogLevel::Error,
                    "run failed",
                    json!({ "error_kind": err.kind(), "error": err.to_string() }),
                );
            }
        }
        if let Err(err) = store::append_run_summary(self.store.root(), &summary) {
            let _ = self.telemetry.log(
                Stage::Setup,
                LogLevel::Warn,
                "run summary not recorded",
                json!({ "error": format!("{err:#}") }),
            );
        }
        let _ = self.telemetry.log(
            Stage::Setup,
            LogLevel::Info,
            "run finished",
            json!({ "status": summary.status }),
        );
        result
    }

    fn run_stages(&self) -> PipelineResult<RunOutcome> {
        let split = self.start_data_ingestion()?;
        let validation = self.start_data_validation(&split)?;
        let transformation = self.start_data_transformation(&split, &validation)?;
        let model = self.start_model_trainer(&transformation)?;
        let decision = self.start_model_evaluation(&model, &split);
        let push = self.start_model_pusher(&model, &decision)?;
        Ok(RunOutcome {
            run_id: self.run_id().to_owned(),
            decision,
            push,
        })
    }
}

/// Builds a pipeline for `config` and runs it once.
pub fn run_from_config(config: &PipelineConfig) -> PipelineResult<RunOutcome> {
    TrainingPipeline::new(config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{IncumbentStatus, RecordSet},
        fixtures,
        prediction::PredictionService,
        store::read_run_summaries,
    };
    use shared_logging::read_records;
    use std::fs;
    use tempfile::tempdir;

    fn registry_files(config: &PipelineConfig) -> usize {
        fs::read_dir(&config.registry.bucket).unwrap().count()
    }

    #[test]
    fn end_to_end_run_promotes_then_evaluates_against_incumbent() {
        let dir = tempdir().unwrap();
        let data = fixtures::insurance_csv(dir.path(), 1000, 17);
        let config = fixtures::pipeline_config(dir.path(), &data);

        let pipeline = TrainingPipeline::new(&config).unwrap();
        let outcome = pipeline.run().unwrap();
        assert_eq!(outcome.status(), RunStatus::Promoted);
        assert!(outcome.decision.accepted);
        assert_eq!(outcome.decision.incumbent, IncumbentStatus::Absent);
        assert_eq!(registry_files(&config), 1);

        let store = pipeline.store();
        let train = RecordSet::read_csv(&store.train_path()).unwrap();
        let test = RecordSet::read_csv(&store.test_path()).unwrap();
        assert_eq!(train.len(), 800);
        assert_eq!(test.len(), 200);
        assert_eq!(train.width(), 12);
        assert!(store.validation_report_path().exists());
        assert!(store.preprocessor_path().exists());
        assert!(store.model_path().exists());

        let log = pipeline.telemetry().log_path().unwrap();
        let stages: Vec<_> = read_records(&log)
            .unwrap()
            .into_iter()
            .filter_map(|record| record.stage)
            .collect();
        for stage in ["ingestion", "validation", "transformation", "training", "evaluation", "pusher"] {
            assert!(stages.iter().any(|s| s == stage), "no {stage} record in run log");
        }

        let second = TrainingPipeline::new(&config).unwrap();
        assert_ne!(second.run_id(), pipeline.run_id());
        let again = second.run().unwrap();
        assert_eq!(again.decision.incumbent, IncumbentStatus::Scored);
        assert_eq!(again.push.published, again.decision.accepted);
        assert_eq!(registry_files(&config), 1);

        let summaries = read_run_summaries(&config.pipeline.artifact_root).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].status, RunStatus::Promoted);
        assert_eq!(summaries[1].status, again.status());

        let service = PredictionService::new(second.registry());
        let features = RecordSet::read_csv(&store.test_path())
            .unwrap()
            .take_column("Response")
            .unwrap()
            .0;
        let prediction = service.predict(&fixtures::customer_record(&features)).unwrap();
        assert!(prediction.prediction <= 1);
    }

    #[test]
    fn failed_run_is_recorded_with_stage() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("short.csv");
        fixtures::insurance_table(50, 3)
            .take_column("Vintage")
            .unwrap()
            .0
            .write_csv(&data)
            .unwrap();
        let config = fixtures::pipeline_config(dir.path(), &data);

        let err = run_from_config(&config).unwrap_err();
        assert_eq!(err.stage(), Stage::Ingestion);
        assert_eq!(err.kind(), "schema_mismatch");

        let summaries = read_run_summaries(&config.pipeline.artifact_root).unwrap();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_stage, Some(Stage::Ingestion));
        assert!(summary.error.as_deref().unwrap().starts_with("schema_mismatch: "));
        assert!(summary.decision.is_none());
        assert!(!config.registry.bucket.exists());
    }

    #[test]
    fn run_log_is_named_after_run() {
        let dir = tempdir().unwrap();
        let data = fixtures::insurance_csv(dir.path(), 10, 1);
        let config = fixtures::pipeline_config(dir.path(), &data);
        let pipeline = TrainingPipeline::new(&config).unwrap();
        let expected = config.pipeline.log_dir.join(format!("{}.log", pipeline.run_id()));
        assert_eq!(pipeline.telemetry().log_path(), Some(expected.clone()));
        assert!(expected.exists());
    }

    #[test]
    fn missing_schema_fails_setup() {
        let dir = tempdir().unwrap();
        let data = fixtures::insurance_csv(dir.path(), 10, 1);
        let mut config = fixtures::pipeline_config(dir.path(), &data);
        config.pipeline.schema_path = dir.path().join("absent.toml");
        let err = TrainingPipeline::new(&config).unwrap_err();
        assert_eq!(err.stage(), Stage::Setup);
    }
}
