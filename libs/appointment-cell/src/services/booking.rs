// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Months, NaiveDate};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::services::time::{add_minutes, is_valid_time};
use doctor_cell::services::{available_slots, is_slot_open, slots_for_view};
use doctor_cell::{AvailabilityStore, AvailabilityWindow, BookedInterval, Slot, SlotView};
use realtime_cell::{EventActor, EventBus, EventInput, Identity, Role};
use shared_config::BookingRules;
use shared_database::DatabaseError;
use shared_utils::{Clock, SystemClock};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, BookFollowUpRequest,
    FollowUpEligibility, StatusChange, StatusChangeRequest, FOLLOW_UP_CONSTRAINT, SLOT_CONSTRAINT,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{NotificationJob, NotificationQueue};
use crate::services::pricing::PricingService;
use crate::services::store::AppointmentStore;

/// Turns booking intents into committed appointments.
///
/// The slot check here only saves doomed round trips. Double booking is
/// prevented by the unique indexes behind `AppointmentStore::insert`, and a
/// violation there is reported the same way as a failed pre-check.
pub struct BookingGuard {
    appointments: Arc<dyn AppointmentStore>,
    availability: Arc<dyn AvailabilityStore>,
    bus: Arc<EventBus>,
    notifications: NotificationQueue,
    lifecycle: AppointmentLifecycleService,
    pricing: PricingService,
    rules: BookingRules,
    clock: Arc<dyn Clock>,
}

/// Everything needed to write one new appointment row.
struct BookingDraft<'a> {
    patient_id: &'a str,
    doctor_id: &'a str,
    date: NaiveDate,
    start_time: &'a str,
    window: &'a AvailabilityWindow,
    fee: f64,
    original_appointment_id: Option<Uuid>,
}

impl BookingGuard {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        availability: Arc<dyn AvailabilityStore>,
        bus: Arc<EventBus>,
        notifications: NotificationQueue,
        rules: BookingRules,
    ) -> Self {
        Self {
            appointments,
            availability,
            bus,
            notifications,
            lifecycle: AppointmentLifecycleService::new(),
            pricing: PricingService::new(&rules),
            rules,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ==========================================================================
    // SLOT QUERIES
    // ==========================================================================

    /// Open slots for a patient to pick from.
    pub async fn available_slots(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<Slot>, AppointmentError> {
        self.slot_grid(doctor_id, date, SlotView::Available).await
    }

    pub async fn slot_grid(&self, doctor_id: &str, date: NaiveDate, view: SlotView) -> Result<Vec<Slot>, AppointmentError> {
        let window = self.open_window(doctor_id, date).await?;
        let booked = self.appointments.booked_intervals(doctor_id, date).await?;
        Ok(slots_for_view(&window, &booked, view))
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, request), fields(patient_id = %actor.uid, doctor_id = %request.doctor_id))]
    pub async fn book_appointment(
        &self,
        actor: &Identity,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.require_patient(actor)?;
        self.validate_request(request.appointment_date, &request.start_time)?;

        let (window, booked) = self.load_schedule(&request.doctor_id, request.appointment_date).await?;
        self.ensure_slot_open(&window, &booked, &request.start_time)?;

        let pricing = self.availability.doctor_pricing(&request.doctor_id).await?;
        let fee = self.pricing.consultation_fee(&pricing, window.slot_duration);

        self.commit(actor, BookingDraft {
            patient_id: &actor.uid,
            doctor_id: &request.doctor_id,
            date: request.appointment_date,
            start_time: &request.start_time,
            window: &window,
            fee,
            original_appointment_id: None,
        })
        .await
    }

    /// Finds the most recent completed appointment between the pair that has
    /// no live follow-up yet and reports whether its window is still open.
    /// The fee is quoted on the slot length of the doctor's window on `on`
    /// when one is open that day, else on the anchor's slot length.
    #[instrument(skip(self))]
    pub async fn check_follow_up_eligibility(
        &self,
        patient_id: &str,
        doctor_id: &str,
        on: Option<NaiveDate>,
    ) -> Result<FollowUpEligibility, AppointmentError> {
        let completed = self.appointments.completed_between(patient_id, doctor_id).await?;
        if completed.is_empty() {
            return Ok(FollowUpEligibility::not_eligible("No completed appointment with this doctor"));
        }

        for appointment in completed {
            if self.appointments.live_follow_up(appointment.id).await?.is_some() {
                debug!("Appointment {} already has a follow-up", appointment.id);
                continue;
            }

            let window_ends_on = self.follow_up_window_end(&appointment).await?;
            if self.clock.today() > window_ends_on {
                return Ok(FollowUpEligibility {
                    eligible: false,
                    anchor_appointment_id: Some(appointment.id),
                    window_ends_on: Some(window_ends_on),
                    follow_up_fee: None,
                    fee_slot_duration: None,
                    reason: Some("Follow-up window has closed".to_string()),
                });
            }

            let slot_duration = match on {
                Some(date) => match self.availability.find_window(doctor_id, date).await? {
                    Some(window) if window.is_available => window.slot_duration,
                    _ => appointment.slot_duration,
                },
                None => appointment.slot_duration,
            };
            let pricing = self.availability.doctor_pricing(doctor_id).await?;
            let fee = self.pricing.consultation_fee(&pricing, slot_duration);
            return Ok(FollowUpEligibility {
                eligible: true,
                anchor_appointment_id: Some(appointment.id),
                window_ends_on: Some(window_ends_on),
                follow_up_fee: Some(self.pricing.follow_up_fee(&pricing, fee)),
                fee_slot_duration: Some(slot_duration),
                reason: None,
            });
        }

        Ok(FollowUpEligibility::not_eligible(
            "Every completed appointment already has a follow-up",
        ))
    }

    #[instrument(skip(self, request), fields(patient_id = %actor.uid, original = %request.original_appointment_id))]
    pub async fn book_follow_up_appointment(
        &self,
        actor: &Identity,
        request: BookFollowUpRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.require_patient(actor)?;
        self.validate_request(request.appointment_date, &request.start_time)?;

        let original = self
            .appointments
            .get(request.original_appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::FollowUpNotEligible("Original appointment not found".to_string()))?;

        if original.patient_id != actor.uid || original.doctor_id != request.doctor_id {
            return Err(AppointmentError::FollowUpNotEligible(
                "Original appointment is not between this patient and doctor".to_string(),
            ));
        }
        if original.status != AppointmentStatus::Completed {
            return Err(AppointmentError::FollowUpNotEligible(
                "Original appointment is not completed".to_string(),
            ));
        }
        if self.appointments.live_follow_up(original.id).await?.is_some() {
            return Err(AppointmentError::FollowUpAlreadyBooked);
        }

        let window_ends_on = self.follow_up_window_end(&original).await?;
        if self.clock.today() > window_ends_on {
            return Err(AppointmentError::FollowUpNotEligible(format!(
                "Follow-up window closed on {}",
                window_ends_on
            )));
        }

        let (window, booked) = self.load_schedule(&request.doctor_id, request.appointment_date).await?;
        self.ensure_slot_open(&window, &booked, &request.start_time)?;

        let pricing = self.availability.doctor_pricing(&request.doctor_id).await?;
        let full_fee = self.pricing.consultation_fee(&pricing, window.slot_duration);
        let fee = self.pricing.follow_up_fee(&pricing, full_fee);

        self.commit(actor, BookingDraft {
            patient_id: &actor.uid,
            doctor_id: &request.doctor_id,
            date: request.appointment_date,
            start_time: &request.start_time,
            window: &window,
            fee,
            original_appointment_id: Some(original.id),
        })
        .await
    }

    // ==========================================================================
    // STATUS
    // ==========================================================================

    #[instrument(skip(self, request), fields(actor = %actor.uid, to = %request.status))]
    pub async fn transition_status(
        &self,
        actor: &Identity,
        appointment_id: Uuid,
        request: StatusChangeRequest,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let reason = request.reason.as_deref().map(str::trim);
        self.lifecycle
            .validate_status_transition(&appointment, request.status, actor, reason)?;

        let now = self.clock.now();
        let change = match request.status {
            AppointmentStatus::Cancelled => StatusChange {
                status: request.status,
                cancellation_reason: reason.map(str::to_string),
                cancelled_by: Some(actor.uid.clone()),
                completed_at: None,
                updated_at: now,
            },
            AppointmentStatus::Completed => StatusChange {
                status: request.status,
                cancellation_reason: None,
                cancelled_by: None,
                completed_at: Some(now),
                updated_at: now,
            },
            _ => StatusChange {
                status: request.status,
                cancellation_reason: None,
                cancelled_by: None,
                completed_at: None,
                updated_at: now,
            },
        };

        let Some(updated) = self
            .appointments
            .update_status(appointment_id, appointment.status, change)
            .await?
        else {
            // Someone else changed the status between our read and write.
            let current = self
                .appointments
                .get(appointment_id)
                .await?
                .map_or(appointment.status, |a| a.status);
            warn!("Status of appointment {} moved to {} concurrently", appointment_id, current);
            return Err(AppointmentError::InvalidTransition { from: current, to: request.status });
        };

        info!("Appointment {} moved from {} to {}", appointment_id, appointment.status, updated.status);
        self.publish_update(actor, &updated, &updated.status.to_string()).await;
        Ok(updated)
    }

    pub async fn get_appointment(&self, actor: &Identity, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        if actor.role != Role::Admin && !appointment.involves(&actor.uid) {
            return Err(AppointmentError::Unauthorized);
        }
        Ok(appointment)
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn require_patient(&self, actor: &Identity) -> Result<(), AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::Unauthorized);
        }
        Ok(())
    }

    fn validate_request(&self, date: NaiveDate, start_time: &str) -> Result<(), AppointmentError> {
        let today = self.clock.today();
        if date < today {
            return Err(AppointmentError::ValidationError(
                "Cannot book appointments in the past".to_string(),
            ));
        }

        let horizon = today
            .checked_add_months(Months::new(self.rules.horizon_months))
            .ok_or_else(|| AppointmentError::ValidationError("Booking horizon out of range".to_string()))?;
        if date > horizon {
            return Err(AppointmentError::ValidationError(format!(
                "Cannot book more than {} months ahead",
                self.rules.horizon_months
            )));
        }

        if !is_valid_time(start_time) {
            return Err(AppointmentError::ValidationError(format!(
                "Invalid start time '{}', expected HH:MM",
                start_time
            )));
        }
        Ok(())
    }

    async fn open_window(&self, doctor_id: &str, date: NaiveDate) -> Result<AvailabilityWindow, AppointmentError> {
        match self.availability.find_window(doctor_id, date).await? {
            Some(window) if window.is_available => Ok(window),
            _ => Err(AppointmentError::NotAvailable),
        }
    }

    async fn load_schedule(
        &self,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<(AvailabilityWindow, Vec<BookedInterval>), AppointmentError> {
        let window = self.open_window(doctor_id, date).await?;
        let booked = self.appointments.booked_intervals(doctor_id, date).await?;
        Ok((window, booked))
    }

    fn ensure_slot_open(
        &self,
        window: &AvailabilityWindow,
        booked: &[BookedInterval],
        start_time: &str,
    ) -> Result<(), AppointmentError> {
        if is_slot_open(window, booked, start_time) {
            return Ok(());
        }
        warn!("Slot {} on {} for doctor {} is not open", start_time, window.date, window.doctor_id);
        Err(AppointmentError::SlotTaken {
            available_slots: available_slots(window, booked),
        })
    }

    async fn follow_up_window_end(&self, anchor: &Appointment) -> Result<NaiveDate, AppointmentError> {
        let base = match self.appointments.prescription_end_date(anchor.id).await? {
            Some(end_date) => end_date,
            None => anchor
                .completed_at
                .map_or(anchor.appointment_date, |at| at.date_naive()),
        };
        Ok(base + ChronoDuration::days(self.rules.follow_up_window_days))
    }

    async fn commit(&self, actor: &Identity, draft: BookingDraft<'_>) -> Result<Appointment, AppointmentError> {
        let end_time = add_minutes(draft.start_time, draft.window.slot_duration)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let now = self.clock.now();

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: draft.patient_id.to_string(),
            doctor_id: draft.doctor_id.to_string(),
            appointment_date: draft.date,
            start_time: draft.start_time.to_string(),
            end_time,
            slot_duration: draft.window.slot_duration,
            status: AppointmentStatus::Pending,
            consultation_fee: draft.fee,
            is_follow_up: draft.original_appointment_id.is_some(),
            original_appointment_id: draft.original_appointment_id,
            cancellation_reason: None,
            cancelled_by: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let stored = match self.appointments.insert(appointment).await {
            Ok(stored) => stored,
            Err(e) => return Err(self.map_insert_conflict(e, draft.window).await),
        };

        info!(
            "Booked appointment {} for patient {} with doctor {} on {} at {}",
            stored.id, stored.patient_id, stored.doctor_id, stored.appointment_date, stored.start_time
        );

        self.publish_update(actor, &stored, "created").await;
        self.notifications
            .enqueue(NotificationJob::BookingConfirmation { appointment: stored.clone() });

        Ok(stored)
    }

    async fn map_insert_conflict(&self, error: DatabaseError, window: &AvailabilityWindow) -> AppointmentError {
        if error.is_unique_violation_of(FOLLOW_UP_CONSTRAINT) {
            warn!("Follow-up insert lost a race");
            return AppointmentError::FollowUpAlreadyBooked;
        }
        if !error.is_unique_violation_of(SLOT_CONSTRAINT) {
            return error.into();
        }

        warn!("Slot insert lost a race for doctor {} on {}", window.doctor_id, window.date);
        let available = match self.appointments.booked_intervals(&window.doctor_id, window.date).await {
            Ok(booked) => available_slots(window, &booked),
            Err(e) => {
                warn!("Could not refresh slots after conflict: {}", e);
                Vec::new()
            }
        };
        AppointmentError::SlotTaken { available_slots: available }
    }

    async fn publish_update(&self, actor: &Identity, appointment: &Appointment, action: &str) {
        let payload = match serde_json::to_value(appointment) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize appointment {} for event: {}", appointment.id, e);
                return;
            }
        };
        let mut input = EventInput::appointment_updated(
            EventActor::from(actor),
            &appointment.id.to_string(),
            &appointment.patient_id,
            &appointment.doctor_id,
            action,
            payload,
        );
        // Follow-up events carry the appointment they continue.
        if let Some(original) = appointment.original_appointment_id {
            input = input.with_correlation_id(original.to_string());
        }
        self.bus.publish(input).await;
    }
}
