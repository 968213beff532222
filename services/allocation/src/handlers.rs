//! HTTP surface
//!
//! Thin axum layer over the engine: boundary validation in, engine
//! outcomes out. No allocation rules live here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use shared::types::{SlotId, SubCap, TokenId};
use uuid::Uuid;

use crate::engine::{AllocationEngine, SlotCapsUpdate};
use crate::error::EngineError;
use crate::validation::{
    self, validate_create_slot, validate_create_token, CreateSlotRequest, CreateTokenRequest,
};

pub struct AppState {
    pub engine: AllocationEngine,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Token lifecycle
        .route("/api/tokens", post(create_token))
        .route("/api/tokens/:id/cancel", post(cancel_token))
        .route("/api/tokens/:id/no-show", post(mark_no_show))
        .route("/api/tokens/:id/complete", post(complete_token))
        // Schedule administration
        .route("/api/doctors", post(register_doctor))
        .route("/api/doctors/:id/slots", post(create_slot))
        .route("/api/slots/:id/caps", put(update_slot_caps))
        .route("/api/slots/:id", delete(deactivate_slot))
        // Day operations and projections
        .route("/api/doctors/:id/expire", post(expire_waiting))
        .route("/api/doctors/:id/availability", get(slot_availability))
        .route("/api/doctors/:id/waiting", get(waiting_list))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::DoctorNotFound
            | EngineError::TokenNotFound
            | EngineError::SlotNotFound => StatusCode::NOT_FOUND,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidStatus { .. }
            | EngineError::AlreadyCancelled
            | EngineError::CannotCancelCompleted => StatusCode::CONFLICT,
            EngineError::StorageConflict | EngineError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: String,
}

#[derive(Debug, Deserialize)]
struct RegisterDoctorRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateCapsRequest {
    capacity: Option<u32>,
    #[serde(default, with = "double_option")]
    paid_cap: Option<Option<u32>>,
    #[serde(default, with = "double_option")]
    follow_up_cap: Option<Option<u32>>,
}

/// Distinguishes an absent field (leave unchanged) from an explicit null
/// (lift the cap).
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u32>::deserialize(deserializer).map(Some)
    }
}

async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTokenRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let input = validate_create_token(request, state.engine.now())?;
    let outcome = state.engine.create_token(input).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn cancel_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TokenId>,
) -> Result<impl IntoResponse, EngineError> {
    let outcome = state.engine.cancel_token(id).await?;
    Ok(Json(outcome))
}

async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TokenId>,
) -> Result<impl IntoResponse, EngineError> {
    let outcome = state.engine.mark_no_show(id).await?;
    Ok(Json(outcome))
}

async fn complete_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TokenId>,
) -> Result<impl IntoResponse, EngineError> {
    let token = state.engine.complete_token(id).await?;
    Ok(Json(token))
}

async fn register_doctor(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterDoctorRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::InvalidInput("name is required".to_string()));
    }
    let doctor = state.engine.register_doctor(name).await?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

async fn create_slot(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let input = validate_create_slot(doctor_id, request, state.engine.now())?;
    let slot = state.engine.create_slot(input).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn update_slot_caps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SlotId>,
    Json(request): Json<UpdateCapsRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let update = SlotCapsUpdate {
        capacity: request.capacity,
        paid_cap: request.paid_cap.map(SubCap::from),
        follow_up_cap: request.follow_up_cap.map(SubCap::from),
    };
    let slot = state.engine.update_slot_caps(id, update).await?;
    Ok(Json(slot))
}

async fn deactivate_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SlotId>,
) -> Result<impl IntoResponse, EngineError> {
    let slot = state.engine.deactivate_slot(id).await?;
    Ok(Json(slot))
}

async fn expire_waiting(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let date = validation::validate_date(&query.date)?;
    let count = state.engine.expire_waiting(doctor_id, date).await?;
    Ok(Json(json!({ "expired": count })))
}

async fn slot_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let date = validation::validate_date(&query.date)?;
    let availability = state.engine.slot_availability(doctor_id, date).await?;
    Ok(Json(availability))
}

async fn waiting_list(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let date = validation::validate_date(&query.date)?;
    let waiting = state.engine.waiting_list(doctor_id, date).await?;
    Ok(Json(waiting))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
