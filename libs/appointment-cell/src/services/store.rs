use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use doctor_cell::services::time::trim_seconds;
use doctor_cell::BookedInterval;
use shared_config::AppConfig;
use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{
    Appointment, AppointmentStatus, Party, PartyContact, StatusChange, FOLLOW_UP_CONSTRAINT, SLOT_CONSTRAINT,
};

/// Appointment persistence. `insert` must enforce the slot and follow-up
/// uniqueness constraints and report a violation as
/// `DatabaseError::UniqueViolation` naming the constraint.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Start/end of every appointment on that date still holding its slot.
    async fn booked_intervals(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<BookedInterval>, DatabaseError>;

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    /// Completed appointments between the pair, most recent first.
    async fn completed_between(&self, patient_id: &str, doctor_id: &str) -> Result<Vec<Appointment>, DatabaseError>;

    /// The non-cancelled follow-up of `original_id`, if any.
    async fn live_follow_up(&self, original_id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    /// End date of the active prescription written during `appointment_id`.
    async fn prescription_end_date(&self, appointment_id: Uuid) -> Result<Option<NaiveDate>, DatabaseError>;

    /// Applies `change` only while the row is still in `expected`. `None`
    /// means the status moved underneath the caller.
    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Option<Appointment>, DatabaseError>;

    async fn party_contact(&self, party: Party, uid: &str) -> Result<Option<PartyContact>, DatabaseError>;
}

// ==============================================================================
// SUPABASE
// ==============================================================================

pub struct SupabaseAppointmentStore {
    supabase: SupabaseClient,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self { supabase: SupabaseClient::new(config) }
    }

    async fn select_appointments(&self, query: &str) -> Result<Vec<Appointment>, DatabaseError> {
        let path = format!("/rest/v1/appointments?{}", query);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().map(normalize_appointment).collect())
    }
}

fn normalize_appointment(mut appointment: Appointment) -> Appointment {
    trim_seconds(&mut appointment.start_time);
    trim_seconds(&mut appointment.end_time);
    appointment
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn booked_intervals(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<BookedInterval>, DatabaseError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=not.in.(cancelled,no_show)&select=start_time,end_time",
            urlencoding::encode(doctor_id),
            date
        );
        let mut intervals: Vec<BookedInterval> = self.supabase.request(Method::GET, &path, None, None).await?;
        for interval in &mut intervals {
            trim_seconds(&mut interval.start_time);
            trim_seconds(&mut interval.end_time);
        }
        Ok(intervals)
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, DatabaseError> {
        let row = serde_json::to_value(&appointment).map_err(|e| DatabaseError::Decode(e.to_string()))?;
        let stored: Appointment = self.supabase.insert_returning("appointments", row, None).await?;
        debug!("Inserted appointment {}", stored.id);
        Ok(normalize_appointment(stored))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self.select_appointments(&format!("id=eq.{}&limit=1", id)).await?.into_iter().next())
    }

    async fn completed_between(&self, patient_id: &str, doctor_id: &str) -> Result<Vec<Appointment>, DatabaseError> {
        self.select_appointments(&format!(
            "patient_id=eq.{}&doctor_id=eq.{}&status=eq.completed&order=appointment_date.desc,start_time.desc",
            urlencoding::encode(patient_id),
            urlencoding::encode(doctor_id)
        ))
        .await
    }

    async fn live_follow_up(&self, original_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self
            .select_appointments(&format!("original_appointment_id=eq.{}&status=neq.cancelled&limit=1", original_id))
            .await?
            .into_iter()
            .next())
    }

    async fn prescription_end_date(&self, appointment_id: Uuid) -> Result<Option<NaiveDate>, DatabaseError> {
        #[derive(Deserialize)]
        struct PrescriptionRow {
            end_date: Option<NaiveDate>,
        }

        let path = format!(
            "/rest/v1/prescriptions?appointment_id=eq.{}&status=eq.active&select=end_date&order=end_date.desc&limit=1",
            appointment_id
        );
        let rows: Vec<PrescriptionRow> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next().and_then(|row| row.end_date))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let mut patch = json!({
            "status": change.status,
            "updated_at": change.updated_at,
        });
        if let Some(fields) = patch.as_object_mut() {
            if let Some(reason) = change.cancellation_reason {
                fields.insert("cancellation_reason".to_string(), Value::String(reason));
            }
            if let Some(by) = change.cancelled_by {
                fields.insert("cancelled_by".to_string(), Value::String(by));
            }
            if let Some(at) = change.completed_at {
                fields.insert("completed_at".to_string(), json!(at));
            }
        }

        let rows: Vec<Appointment> = self
            .supabase
            .update_returning("appointments", &format!("id=eq.{}&status=eq.{}", id, expected), patch, None)
            .await?;
        Ok(rows.into_iter().next().map(normalize_appointment))
    }

    async fn party_contact(&self, party: Party, uid: &str) -> Result<Option<PartyContact>, DatabaseError> {
        let table = match party {
            Party::Patient => "patients",
            Party::Doctor => "doctors",
        };
        let path = format!(
            "/rest/v1/{}?id=eq.{}&select=full_name,email&limit=1",
            table,
            urlencoding::encode(uid)
        );
        let rows: Vec<PartyContact> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

#[derive(Default)]
struct MemoryState {
    appointments: Vec<Appointment>,
    prescriptions: HashMap<Uuid, NaiveDate>,
    contacts: HashMap<String, PartyContact>,
}

/// Single-lock store. Uniqueness checks and the insert happen under the same
/// lock, mirroring the partial unique indexes.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    state: Mutex<MemoryState>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_prescription(&self, appointment_id: Uuid, end_date: NaiveDate) {
        self.state.lock().await.prescriptions.insert(appointment_id, end_date);
    }

    pub async fn set_contact(&self, uid: &str, full_name: &str, email: Option<&str>) {
        self.state.lock().await.contacts.insert(uid.to_string(), PartyContact {
            full_name: full_name.to_string(),
            email: email.map(str::to_string),
        });
    }

    pub async fn all(&self) -> Vec<Appointment> {
        self.state.lock().await.appointments.clone()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn booked_intervals(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<BookedInterval>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .appointments
            .iter()
            .filter(|a| a.doctor_id == doctor_id && a.appointment_date == date && a.status.holds_slot())
            .map(|a| BookedInterval::new(a.start_time.clone(), a.end_time.clone()))
            .collect())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, DatabaseError> {
        let mut state = self.state.lock().await;

        let slot_clash = state.appointments.iter().any(|a| {
            a.status.holds_slot()
                && a.doctor_id == appointment.doctor_id
                && a.appointment_date == appointment.appointment_date
                && a.start_time == appointment.start_time
        });
        if slot_clash {
            return Err(DatabaseError::UniqueViolation { constraint: Some(SLOT_CONSTRAINT.to_string()) });
        }

        if let Some(original) = appointment.original_appointment_id {
            let follow_up_clash = state
                .appointments
                .iter()
                .any(|a| a.original_appointment_id == Some(original) && a.status != AppointmentStatus::Cancelled);
            if follow_up_clash {
                return Err(DatabaseError::UniqueViolation { constraint: Some(FOLLOW_UP_CONSTRAINT.to_string()) });
            }
        }

        state.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self.state.lock().await.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn completed_between(&self, patient_id: &str, doctor_id: &str) -> Result<Vec<Appointment>, DatabaseError> {
        let state = self.state.lock().await;
        let mut completed: Vec<Appointment> = state
            .appointments
            .iter()
            .filter(|a| {
                a.patient_id == patient_id && a.doctor_id == doctor_id && a.status == AppointmentStatus::Completed
            })
            .cloned()
            .collect();
        completed.sort_by(|a, b| {
            (b.appointment_date, &b.start_time).cmp(&(a.appointment_date, &a.start_time))
        });
        Ok(completed)
    }

    async fn live_follow_up(&self, original_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .appointments
            .iter()
            .find(|a| a.original_appointment_id == Some(original_id) && a.status != AppointmentStatus::Cancelled)
            .cloned())
    }

    async fn prescription_end_date(&self, appointment_id: Uuid) -> Result<Option<NaiveDate>, DatabaseError> {
        Ok(self.state.lock().await.prescriptions.get(&appointment_id).copied())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let mut state = self.state.lock().await;
        let Some(row) = state.appointments.iter_mut().find(|a| a.id == id && a.status == expected) else {
            return Ok(None);
        };

        row.status = change.status;
        row.updated_at = change.updated_at;
        if change.cancellation_reason.is_some() {
            row.cancellation_reason = change.cancellation_reason;
        }
        if change.cancelled_by.is_some() {
            row.cancelled_by = change.cancelled_by;
        }
        if change.completed_at.is_some() {
            row.completed_at = change.completed_at;
        }
        Ok(Some(row.clone()))
    }

    async fn party_contact(&self, _party: Party, uid: &str) -> Result<Option<PartyContact>, DatabaseError> {
        Ok(self.state.lock().await.contacts.get(uid).cloned())
    }
}
