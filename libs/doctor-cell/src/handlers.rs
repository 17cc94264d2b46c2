use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{AvailabilityError, UpsertAvailabilityRequest};
use crate::services::AvailabilityService;

#[derive(Clone)]
pub struct DoctorCellState {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService>,
}

/// Body of `PUT /{doctor_id}/availability/{date}`; the date comes from the path.
#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub start_time: String,
    pub end_time: String,
    pub slot_duration: u32,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
    pub is_available: Option<bool>,
}

impl From<AvailabilityError> for AppError {
    fn from(e: AvailabilityError) -> Self {
        match e {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::Time(e) => AppError::ValidationError(e.to_string()),
            AvailabilityError::Unauthorized => AppError::Forbidden("Not allowed to edit this availability".to_string()),
            AvailabilityError::Database(msg) => AppError::Database(msg),
        }
    }
}

pub async fn get_availability(
    State(state): State<DoctorCellState>,
    Path((doctor_id, date)): Path<(String, NaiveDate)>,
) -> Result<Json<Value>, AppError> {
    let window = state
        .availability
        .get_window(&doctor_id, date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No availability for {} on {}", doctor_id, date)))?;

    Ok(Json(json!(window)))
}

pub async fn upsert_availability(
    State(state): State<DoctorCellState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date)): Path<(String, NaiveDate)>,
    Json(body): Json<AvailabilityBody>,
) -> Result<Json<Value>, AppError> {
    if user.id != doctor_id {
        return Err(AvailabilityError::Unauthorized.into());
    }
    info!("Doctor {} editing availability for {}", doctor_id, date);

    let request = UpsertAvailabilityRequest {
        date,
        start_time: body.start_time,
        end_time: body.end_time,
        slot_duration: body.slot_duration,
        break_start: body.break_start,
        break_end: body.break_end,
        is_available: body.is_available,
    };

    let window = state.availability.upsert_window(&doctor_id, request).await?;
    Ok(Json(json!({
        "success": true,
        "availability": window
    })))
}
