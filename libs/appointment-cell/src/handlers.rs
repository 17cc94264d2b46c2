// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use doctor_cell::SlotView;
use realtime_cell::{Identity, Role};
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{AppointmentError, BookAppointmentRequest, BookFollowUpRequest, StatusChangeRequest};
use crate::services::BookingGuard;

#[derive(Clone)]
pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub guard: Arc<BookingGuard>,
}

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    #[serde(default)]
    pub view: SlotView,
}

#[derive(Debug, Deserialize)]
pub struct EligibilityQuery {
    pub doctor_id: String,
    pub date: Option<NaiveDate>,
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::NotAvailable => AppError::NotFound(e.to_string()),
            AppointmentError::SlotTaken { ref available_slots } => AppError::Conflict {
                details: Some(json!({ "available_slots": available_slots })),
                message: e.to_string(),
            },
            AppointmentError::InvalidTransition { .. } | AppointmentError::FollowUpAlreadyBooked => {
                AppError::conflict(e.to_string())
            }
            AppointmentError::NotFound => AppError::NotFound(e.to_string()),
            AppointmentError::Unauthorized => AppError::Forbidden(e.to_string()),
            AppointmentError::FollowUpNotEligible(_) => AppError::BadRequest(e.to_string()),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

fn identity_of(user: &User) -> Result<Identity, AppError> {
    let role = user
        .role
        .as_deref()
        .and_then(Role::from_claim)
        .ok_or_else(|| AppError::Forbidden("Token carries no recognised role".to_string()))?;
    Ok(Identity::new(user.id.clone(), role))
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

/// The full grid exposes which slots are booked, so it is limited to the
/// doctor themself and admins.
pub async fn get_slots(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let identity = identity_of(&user)?;
    if query.view == SlotView::All && identity.role != Role::Admin && identity.uid != doctor_id {
        return Err(AppError::Forbidden("Only the doctor can view the full slot grid".to_string()));
    }

    let slots = state.guard.slot_grid(&doctor_id, query.date, query.view).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "slots": slots
    })))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let identity = identity_of(&user)?;
    let appointment = state.guard.book_appointment(&identity, request).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment
    }))))
}

pub async fn check_follow_up_eligibility(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Query(query): Query<EligibilityQuery>,
) -> Result<Json<Value>, AppError> {
    let identity = identity_of(&user)?;
    let eligibility = state
        .guard
        .check_follow_up_eligibility(&identity.uid, &query.doctor_id, query.date)
        .await?;

    Ok(Json(json!(eligibility)))
}

pub async fn book_follow_up(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookFollowUpRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let identity = identity_of(&user)?;
    let appointment = state.guard.book_follow_up_appointment(&identity, request).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment
    }))))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

pub async fn update_status(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let identity = identity_of(&user)?;
    let appointment = state.guard.transition_status(&identity, appointment_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn get_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let identity = identity_of(&user)?;
    let appointment = state.guard.get_appointment(&identity, appointment_id).await?;
    Ok(Json(json!(appointment)))
}
