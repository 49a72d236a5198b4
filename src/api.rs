use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::WorkflowError;
use crate::pipeline::{LeadFieldsUpdate, NewActivity, NewLead, Pipeline, timeline};

/// Header carrying the acting user's id.
pub const ACTOR_HEADER: &str = "x-leadflow-actor";
const DEFAULT_ACTOR: &str = "system";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub pipeline: Pipeline,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MoveLeadRequest {
    pub stage: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Workflow(WorkflowError),
    /// A request body that could not be read as the expected JSON shape.
    Body(JsonRejection),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Workflow(err)
    }
}

fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::StructuralPolicyViolation { .. }
        | WorkflowError::DuplicateLead { .. }
        | WorkflowError::StageConflict { .. } => StatusCode::CONFLICT,
        WorkflowError::WorkflowValidationFailed { .. }
        | WorkflowError::UnknownStage { .. }
        | WorkflowError::CurrentStageNotConfigured { .. }
        | WorkflowError::InvalidFieldUpdate(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn render(status: StatusCode, err: &WorkflowError) -> Response {
    let payload = err.to_payload();
    let mut body = serde_json::json!({"error": payload.message});
    if let (Some(map), Ok(serde_json::Value::Object(extra))) =
        (body.as_object_mut(), serde_json::to_value(&payload))
    {
        map.extend(extra);
    }
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Workflow(err) => render(status_for(&err), &err),
            ApiError::Body(rejection) => render(
                rejection.status(),
                &WorkflowError::InvalidFieldUpdate(rejection.body_text()),
            ),
        }
    }
}

/// `Json<T>` whose rejections render as the API's JSON error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::Body(rejection)),
        }
    }
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/stages", get(list_stages))
        .route("/api/board", get(get_board))
        .route("/api/leads", post(create_lead))
        .route("/api/leads/{id}", get(get_lead).patch(update_lead))
        .route("/api/leads/{id}/move", post(move_lead))
        .route(
            "/api/leads/{id}/activities",
            get(list_activities).post(add_activity),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_stages(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.pipeline.graph().stages().to_vec())
}

async fn get_board(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let board = state.pipeline.board().await?;
    Ok(Json(board))
}

async fn create_lead(
    State(state): State<SharedState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<NewLead>,
) -> Result<impl IntoResponse, ApiError> {
    let lead = state.pipeline.create_lead(req, &actor(&headers)).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

async fn get_lead(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lead = state.pipeline.require_lead(&id).await?;
    Ok(Json(lead))
}

async fn update_lead(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LeadFieldsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .pipeline
        .update_fields(&id, req, &actor(&headers))
        .await?;
    let lead = state.pipeline.require_lead(&id).await?;
    Ok(Json(lead))
}

async fn move_lead(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<MoveLeadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .pipeline
        .request_move(&id, &req.stage, &actor(&headers))
        .await?;
    Ok(Json(outcome))
}

async fn list_activities(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lead = state.pipeline.require_lead(&id).await?;
    let entries: Vec<_> = timeline(&lead.activities).into_iter().cloned().collect();
    Ok(Json(entries))
}

async fn add_activity(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<NewActivity>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .pipeline
        .add_activity(&id, req, &actor(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// ── Tests ─────────────────────────────────────────────────────────────
