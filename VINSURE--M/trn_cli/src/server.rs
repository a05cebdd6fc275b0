//! HTTP front end: retraining trigger and single-record prediction.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use vinsure_pipeline::prelude::*;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<PipelineConfig>,
    predictor: Arc<PredictionService>,
    training: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: PipelineConfig) -> Self {
        let registry = Arc::new(FsModelRegistry::from_config(&config.registry));
        Self {
            config: Arc::new(config),
            predictor: Arc::new(PredictionService::new(registry)),
            training: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pipeline: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/train", post(train))
        .route("/predict", post(predict))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, config: PipelineConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "serving");
    axum::serve(listener, router(AppState::new(config)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            pipeline: state.config.pipeline.name.clone(),
        }),
    )
}

async fn train(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Ok(guard) = Arc::clone(&state.training).try_lock_owned() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a training run is already in progress" })),
        );
    };
    let config = Arc::clone(&state.config);
    let predictor = Arc::clone(&state.predictor);
    let joined = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let outcome = run_from_config(&config)?;
        if outcome.push.published {
            if let Err(err) = predictor.reload() {
                tracing::warn!(error = %err, "published model not reloaded");
                predictor.invalidate();
            }
        }
        Ok::<RunOutcome, PipelineError>(outcome)
    })
    .await;
    match joined {
        Ok(Ok(outcome)) => {
            tracing::info!(run_id = %outcome.run_id, status = %outcome.status(), "training run finished");
            (StatusCode::OK, Json(json!(outcome)))
        }
        Ok(Err(err)) => {
            tracing::error!(stage = %err.stage(), error = %err, "training run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body(&err)))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("training task aborted: {err}") })),
        ),
    }
}

async fn predict(
    State(state): State<AppState>,
    Json(record): Json<CustomerRecord>,
) -> (StatusCode, Json<Value>) {
    let predictor = Arc::clone(&state.predictor);
    match tokio::task::spawn_blocking(move || predictor.predict(&record)).await {
        Ok(Ok(prediction)) => (StatusCode::OK, Json(json!(prediction))),
        Ok(Err(err)) => {
            let status = match err {
                PipelineError::RegistryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::InvalidInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(error_body(&err)))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("prediction task aborted: {err}") })),
        ),
    }
}

fn error_body(err: &PipelineError) -> Value {
    json!({
        "error_kind": err.kind(),
        "stage": err.stage(),
        "error": err.to_string(),
    })
}
