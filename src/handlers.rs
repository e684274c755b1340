use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::compliance::ComplianceGate;
use crate::errors::AppError;
use crate::models::LeadId;
use crate::nurture::{NurtureRegistry, NurtureTrigger};
use crate::pipeline::LeadPipeline;
use crate::queue::WorkQueue;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LeadPipeline>,
    pub queue: WorkQueue,
    pub nurture: Arc<NurtureRegistry>,
    /// Same gate the dispatch service consults.
    pub gate: ComplianceGate,
}

/// Builds the collaborator API.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/v1/leads/:id", get(lead_status))
        .route("/api/v1/leads/:id/pipeline", post(schedule_pipeline))
        .route("/api/v1/leads/:id/forget", post(forget_lead))
        .route("/api/v1/agent/nurture/:id", post(advance_nurture))
        .route("/api/v1/compliance/dnc-check", post(dnc_check))
        // 1MB is far above any payload these routes take
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(1024 * 1024)));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "mos-lead-engine",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/leads/:id
///
/// Status as observed right now; `enriching` while a run holds the lead.
pub async fn lead_status(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state.pipeline.observed_status(lead_id).await?;
    let lead = state
        .pipeline
        .store()
        .fetch_lead(lead_id)
        .await?
        .ok_or(AppError::LeadNotFound(lead_id))?;

    Ok(Json(json!({
        "lead_id": lead_id,
        "status": status,
        "lead_score": lead.lead_score,
        "priority_tag": lead.annotations.priority_tag,
    })))
}

/// POST /api/v1/leads/:id/pipeline
///
/// Called once a lead is verified. Returns as soon as the run is queued.
pub async fn schedule_pipeline(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("POST /leads/{}/pipeline", lead_id);
    let job_id = state.queue.enqueue_pipeline(lead_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "scheduled",
            "lead_id": lead_id,
            "job_id": job_id,
        })),
    ))
}

/// POST /api/v1/leads/:id/forget
pub async fn forget_lead(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("POST /leads/{}/forget", lead_id);
    let lead = state.pipeline.anonymize(lead_id).await?;

    Ok(Json(json!({
        "lead_id": lead.id,
        "status": lead.status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NurtureRequest {
    pub trigger: String,
}

/// POST /api/v1/agent/nurture/:id
pub async fn advance_nurture(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<LeadId>,
    Json(payload): Json<NurtureRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let trigger: NurtureTrigger = payload.trigger.parse()?;
    tracing::info!("POST /agent/nurture/{} - trigger: {}", lead_id, trigger);

    let outcome = state.nurture.advance_nurture(lead_id, trigger).await?;

    Ok(Json(json!({
        "lead_id": lead_id,
        "trigger": trigger,
        "result": outcome,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DncCheckRequest {
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DncCheckResponse {
    pub phone: String,
    pub is_safe_to_call: bool,
    pub status: String,
}

/// POST /api/v1/compliance/dnc-check
pub async fn dnc_check(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DncCheckRequest>,
) -> Result<Json<DncCheckResponse>, AppError> {
    if payload.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone is required".to_string()));
    }

    let is_safe = state.gate.is_safe_to_call(&payload.phone).await;
    Ok(Json(DncCheckResponse {
        phone: payload.phone,
        is_safe_to_call: is_safe,
        status: if is_safe { "SAFE" } else { "DNC_LISTED" }.to_string(),
    }))
}
