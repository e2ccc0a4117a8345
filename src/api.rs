use std::sync::Arc;
use std::time::Instant;

use rocket::http::Status;
use rocket::serde::json::{self, Json};
use rocket::{catch, get, post, Request, State};

use crate::aggregation::AggregationStrategy;
use crate::app_state::AppState;
use crate::citation::filter_citations;
use crate::engine::Message;
use crate::error::{AppError, Result};
use crate::model_registry::Capability;
use crate::types::{
    CitationResponse,
    Entity,
    ErrorResponse,
    GenerateRequest,
    GenerateResponse,
    HealthResponse,
    LoadModelRequest,
    LoadModelResponse,
    ModelInfoResponse,
    NerRequest,
    NerResponse,
};

fn require_text(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("`{field}` must not be empty")));
    }
    Ok(value)
}

/// Runs a blocking inference call on the blocking pool.
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    rocket::tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Inference(format!("inference task aborted: {e}")))?
        .map_err(AppError::inference)
}

async fn tag_entities(state: &AppState, text: String) -> Result<Vec<Entity>> {
    let tagger = state.tagger().await?;
    let started = Instant::now();
    let entities = run_blocking(move || tagger.tag(&text, AggregationStrategy::Simple)).await?;
    tracing::debug!(
        entities = entities.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tagging finished"
    );
    Ok(entities)
}

#[get("/health")]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[get("/models")]
pub async fn list_models(state: &State<Arc<AppState>>) -> Json<Vec<ModelInfoResponse>> {
    let models = state.list_models();
    let resp: Vec<ModelInfoResponse> = models
        .into_iter()
        .map(|m| ModelInfoResponse {
            capability: m.capability,
            model_id: m.model_id,
            status: format!("{:?}", m.status),
            last_error: m.last_error,
        })
        .collect();

    Json(resp)
}

/// Resolves a handle ahead of the first request that needs it.
#[post("/load", data = "<req>")]
pub async fn load_model(
    state: &State<Arc<AppState>>,
    req: std::result::Result<Json<LoadModelRequest>, json::Error<'_>>,
) -> Result<Json<LoadModelResponse>> {
    let capability = req?.capability.parse::<Capability>().map_err(AppError::Validation)?;
    let already_resolved = state.is_resolved(capability);

    state.resolve(capability).await?;

    let meta = state
        .registry
        .get_model(capability)
        .ok_or_else(|| AppError::Validation(format!("capability `{capability}` is not registered")))?;
    let message = if already_resolved {
        "model handle already resolved"
    } else {
        "model handle loaded"
    };

    Ok(Json(LoadModelResponse {
        capability,
        model_id: meta.model_id,
        status: format!("{:?}", meta.status),
        message: message.to_string(),
    }))
}

#[post("/generate", data = "<req>")]
pub async fn generate(
    state: &State<Arc<AppState>>,
    req: std::result::Result<Json<GenerateRequest>, json::Error<'_>>,
) -> Result<Json<GenerateResponse>> {
    let prompt = require_text("prompt", req?.into_inner().prompt)?;
    let generator = state.generator().await?;

    let started = Instant::now();
    let conversation = run_blocking(move || generator.generate(&[Message::user(&prompt)])).await?;
    let response = conversation
        .last()
        .map(|message| message.content.clone())
        .ok_or_else(|| AppError::Inference("generator returned an empty conversation".to_string()))?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        response_chars = response.chars().count(),
        "generation finished"
    );

    Ok(Json(GenerateResponse { response }))
}

#[post("/ner", data = "<req>")]
pub async fn ner(
    state: &State<Arc<AppState>>,
    req: std::result::Result<Json<NerRequest>, json::Error<'_>>,
) -> Result<Json<NerResponse>> {
    let text = require_text("text", req?.into_inner().text)?;
    let entities = tag_entities(state, text).await?;
    Ok(Json(NerResponse { entities }))
}

#[post("/citation_recognize", data = "<req>")]
pub async fn citation_recognize(
    state: &State<Arc<AppState>>,
    req: std::result::Result<Json<NerRequest>, json::Error<'_>>,
) -> Result<Json<CitationResponse>> {
    let text = require_text("text", req?.into_inner().text)?;
    let entities = tag_entities(state, text).await?;
    Ok(Json(CitationResponse {
        citations: filter_citations(entities),
    }))
}

#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: status.reason_lossy().to_lowercase(),
            status: status.code,
        }),
    )
}
