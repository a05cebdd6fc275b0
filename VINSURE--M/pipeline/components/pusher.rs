use std::fs;

use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    entity::{EvaluationDecision, ModelArtifact, PushArtifact},
    error::{PipelineError, PipelineResult, Stage, StageContext},
    registry::{ModelBlob, ModelRegistry},
    telemetry::PipelineTelemetry,
};

const STAGE: Stage = Stage::Pusher;

/// Publishes an accepted model to the registry.
#[derive(Debug)]
pub struct ModelPusher<'a> {
    registry: &'a dyn ModelRegistry,
    telemetry: &'a PipelineTelemetry,
}

impl<'a> ModelPusher<'a> {
    /// Creates the stage.
    #[must_use]
    pub const fn new(registry: &'a dyn ModelRegistry, telemetry: &'a PipelineTelemetry) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// Replaces the deployed model iff the decision accepted the trained one.
    pub fn initiate(
        &self,
        model: &ModelArtifact,
        decision: &EvaluationDecision,
    ) -> PipelineResult<PushArtifact> {
        let registry_location = self.registry.location();
        if !decision.accepted {
            let _ = self.telemetry.log(
                STAGE,
                LogLevel::Info,
                "deployed model kept",
                json!({ "registry": registry_location }),
            );
            return Ok(PushArtifact {
                published: false,
                registry_location,
            });
        }

        let bytes = fs::read(&model.trained_model_path).with_stage_context(STAGE, || {
            format!("reading {}", model.trained_model_path.display())
        })?;
        let blob = ModelBlob::new(bytes);
        self.registry
            .publish(&blob)
            .map_err(|source| PipelineError::RegistryUnavailable {
                stage: STAGE,
                source,
            })?;
        let _ = self.telemetry.log(
            STAGE,
            LogLevel::Info,
            "trained model published",
            json!({ "registry": registry_location, "bytes": blob.len() }),
        );
        Ok(PushArtifact {
            published: true,
            registry_location,
        })
    }
}
