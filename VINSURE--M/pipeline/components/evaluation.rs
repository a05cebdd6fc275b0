use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    components::transformation::split_target,
    entity::{
        config::EvaluationConfig, EvaluationDecision, IncumbentStatus, ModelArtifact, RecordSet,
        SchemaRegistry, SplitArtifact,
    },
    error::{PipelineError, PipelineResult, Stage, StageContext},
    estimator::InsuranceModel,
    ml::classification_metric,
    registry::ModelRegistry,
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Evaluation;

/// Promotion gate: compares the trained model with the deployed one on the test partition.
#[derive(Debug)]
pub struct ModelEvaluation<'a> {
    config: &'a EvaluationConfig,
    schema: &'a SchemaRegistry,
    registry: &'a dyn ModelRegistry,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> ModelEvaluation<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(
        config: &'a EvaluationConfig,
        schema: &'a SchemaRegistry,
        registry: &'a dyn ModelRegistry,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            config,
            schema,
            registry,
            telemetry,
        }
    }

    /// Produces the decision. Never fails: when the incumbent cannot be fetched or scored the
    /// trained model is accepted and the cause is recorded.
    #[must_use]
    pub fn initiate(&self, model: &ModelArtifact, split: &SplitArtifact) -> EvaluationDecision {
        let trained_score = model.metric.f1;
        let decision = match self.incumbent_score(split) {
            Ok(incumbent) => decide(trained_score, incumbent, self.config.min_improvement),
            Err(err) => {
                let reason = err.to_string();
                let _ = self.telemetry.log(
                    STAGE,
                    LogLevel::Error,
                    "incumbent unreadable, accepting trained model",
                    json!({ "error_kind": err.kind(), "reason": reason }),
                );
                EvaluationDecision {
                    trained_score,
                    incumbent_score: 0.0,
                    accepted: true,
                    score_delta: 0.0,
                    incumbent: IncumbentStatus::Unreadable { reason },
                }
            }
        };
        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            if decision.accepted {
                "trained model accepted"
            } else {
                "trained model rejected"
            },
            json!(decision),
        );
        decision
    }

    /// F1 of the deployed model on the raw test partition, `None` when nothing is deployed.
    fn incumbent_score(&self, split: &SplitArtifact) -> PipelineResult<Option<f64>> {
        let unavailable = |source| PipelineError::RegistryUnavailable { stage: STAGE, source };
        if !self.registry.exists().map_err(unavailable)? {
            return Ok(None);
        }
        let blob = self.registry.fetch().map_err(unavailable)?;
        let incumbent =
            InsuranceModel::from_blob(&blob).stage_context(STAGE, "decoding incumbent model")?;

        let test = RecordSet::read_csv(&split.test_path)
            .stage_context(STAGE, "reading test partition")?;
        let (features, labels) = split_target(self.schema, &test).map_err(|err| match err {
            PipelineError::SchemaMismatch { detail, .. } => PipelineError::schema(STAGE, detail),
            PipelineError::InvalidInput { detail, .. } => PipelineError::invalid(STAGE, detail),
            other => other,
        })?;
        let predicted = incumbent
            .predict(&features)
            .map_err(|err| PipelineError::schema(STAGE, format!("scoring incumbent: {err:#}")))?;
        Ok(Some(classification_metric(&labels, &predicted).f1))
    }
}

/// Acceptance rule. No incumbent: accept. Otherwise accept iff the trained score beats the
/// incumbent by more than `min_improvement`; ties are rejected.
#[must_use]
pub fn decide(trained_score: f64, incumbent: Option<f64>, min_improvement: f64) -> EvaluationDecision {
    match incumbent {
        None => EvaluationDecision {
            trained_score,
            incumbent_score: 0.0,
            accepted: true,
            score_delta: 0.0,
            incumbent: IncumbentStatus::Absent,
        },
        Some(incumbent_score) => {
            let diff = trained_score - incumbent_score;
            EvaluationDecision {
                trained_score,
                incumbent_score,
                accepted: diff > min_improvement,
                score_delta: diff.abs(),
                incumbent: IncumbentStatus::Scored,
            }
        }
    }
}
