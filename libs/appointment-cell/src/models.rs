// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::{AvailabilityError, Slot};

/// Unique index on `(doctor_id, appointment_date, start_time)` for rows that
/// still hold their slot.
pub const SLOT_CONSTRAINT: &str = "appointments_slot_unique";

/// Unique index on `original_appointment_id` for non-cancelled follow-ups.
pub const FOLLOW_UP_CONSTRAINT: &str = "appointments_follow_up_unique";

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: String,
    pub doctor_id: String,
    pub appointment_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub slot_duration: u32,
    pub status: AppointmentStatus,
    pub consultation_fee: f64,
    #[serde(default)]
    pub is_follow_up: bool,
    pub original_appointment_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn involves(&self, uid: &str) -> bool {
        self.patient_id == uid || self.doctor_id == uid
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether an appointment in this status still occupies its slot.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

/// Fields written together with a status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Patient,
    Doctor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyContact {
    pub full_name: String,
    pub email: Option<String>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: String,
    pub appointment_date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookFollowUpRequest {
    pub doctor_id: String,
    pub original_appointment_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpEligibility {
    pub eligible: bool,
    pub anchor_appointment_id: Option<Uuid>,
    pub window_ends_on: Option<NaiveDate>,
    pub follow_up_fee: Option<f64>,
    /// Slot length in minutes the quoted fee assumes.
    pub fee_slot_duration: Option<u32>,
    pub reason: Option<String>,
}

impl FollowUpEligibility {
    pub fn not_eligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            anchor_appointment_id: None,
            window_ends_on: None,
            follow_up_fee: None,
            fee_slot_duration: None,
            reason: Some(reason.into()),
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Doctor is not available on this date")]
    NotAvailable,

    #[error("Appointment slot is no longer available")]
    SlotTaken { available_slots: Vec<Slot> },

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment not found")]
    NotFound,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Not eligible for a follow-up: {0}")]
    FollowUpNotEligible(String),

    #[error("A follow-up has already been booked for this appointment")]
    FollowUpAlreadyBooked,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<shared_database::DatabaseError> for AppointmentError {
    fn from(e: shared_database::DatabaseError) -> Self {
        AppointmentError::DatabaseError(e.to_string())
    }
}

impl From<AvailabilityError> for AppointmentError {
    fn from(e: AvailabilityError) -> Self {
        match e {
            AvailabilityError::Validation(msg) => AppointmentError::ValidationError(msg),
            AvailabilityError::Time(e) => AppointmentError::ValidationError(e.to_string()),
            AvailabilityError::Unauthorized => AppointmentError::Unauthorized,
            AvailabilityError::Database(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}
