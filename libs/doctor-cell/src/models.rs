// libs/doctor-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::services::time::{self, TimeError};

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// A doctor's working hours for one calendar date. Editing replaces the whole
/// window; slots are always derived from the current window, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub doctor_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub slot_duration: u32,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
    pub is_available: bool,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    /// Checks the window invariants: well-formed clock times, `start < end`,
    /// a positive duration that fits the window, and a break (if any) that is
    /// ordered and lies inside the window.
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        let start = time::time_to_minutes(&self.start_time)?;
        let end = time::time_to_minutes(&self.end_time)?;

        if start >= end {
            return Err(AvailabilityError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }
        if self.slot_duration == 0 {
            return Err(AvailabilityError::Validation(
                "Slot duration must be at least one minute".to_string(),
            ));
        }
        if self.slot_duration > end - start {
            return Err(AvailabilityError::Validation(
                "Slot duration is longer than the working window".to_string(),
            ));
        }

        match (&self.break_start, &self.break_end) {
            (None, None) => Ok(()),
            (Some(break_start), Some(break_end)) => {
                let break_start = time::time_to_minutes(break_start)?;
                let break_end = time::time_to_minutes(break_end)?;
                if break_start >= break_end {
                    return Err(AvailabilityError::Validation(
                        "Break start must be before break end".to_string(),
                    ));
                }
                if break_start < start || break_end > end {
                    return Err(AvailabilityError::Validation(
                        "Break must lie within the working window".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Err(AvailabilityError::Validation(
                "Break start and break end must be set together".to_string(),
            )),
        }
    }
}

/// Start/end of a non-cancelled appointment already holding a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookedInterval {
    pub start_time: String,
    pub end_time: String,
}

impl BookedInterval {
    pub fn new(start_time: impl Into<String>, end_time: impl Into<String>) -> Self {
        Self {
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start_time: String,
    pub end_time: String,
    pub duration: u32,
    pub is_available: bool,
}

/// Which part of the slot grid a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotView {
    /// Only open slots (patient-facing).
    #[default]
    Available,
    /// Every slot including booked ones (operational view).
    All,
}

/// Fee settings configured on the doctor profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoctorPricing {
    pub hourly_rate: Option<f64>,
    pub follow_up_percentage: Option<u8>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAvailabilityRequest {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub slot_duration: u32,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
    pub is_available: Option<bool>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error("Unauthorized access to availability")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<shared_database::DatabaseError> for AvailabilityError {
    fn from(e: shared_database::DatabaseError) -> Self {
        AvailabilityError::Database(e.to_string())
    }
}
