#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use appointment_cell::*;
use doctor_cell::{AvailabilityStore, AvailabilityWindow, DoctorPricing, InMemoryAvailabilityStore};
use realtime_cell::{DomainEvent, EventBus, Identity, Role};
use shared_config::{BookingRules, RealtimeSettings};
use shared_utils::FixedClock;

pub const DOCTOR: &str = "doc-1";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hour, 0, 0).unwrap()
}

pub fn patient(uid: &str) -> Identity {
    Identity::new(uid, Role::Patient)
}

pub fn doctor() -> Identity {
    Identity::new(DOCTOR, Role::Doctor)
}

/// 09:00-12:00, 30 minute slots, break 10:30-11:00.
pub fn morning_window(on: NaiveDate) -> AvailabilityWindow {
    AvailabilityWindow {
        id: Uuid::new_v4(),
        doctor_id: DOCTOR.to_string(),
        date: on,
        start_time: "09:00".to_string(),
        end_time: "12:00".to_string(),
        slot_duration: 30,
        break_start: Some("10:30".to_string()),
        break_end: Some("11:00".to_string()),
        is_available: true,
        updated_at: Utc::now(),
    }
}

pub fn completed(patient_id: &str, on: NaiveDate, original: Option<Uuid>) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id: patient_id.to_string(),
        doctor_id: DOCTOR.to_string(),
        appointment_date: on,
        start_time: "09:00".to_string(),
        end_time: "09:30".to_string(),
        slot_duration: 30,
        status: AppointmentStatus::Completed,
        consultation_fee: 60.0,
        is_follow_up: original.is_some(),
        original_appointment_id: original,
        cancellation_reason: None,
        cancelled_by: None,
        completed_at: Some(Utc.from_utc_datetime(&on.and_hms_opt(9, 30, 0).unwrap())),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub struct Harness {
    pub guard: Arc<BookingGuard>,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub availability: Arc<InMemoryAvailabilityStore>,
    pub bus: Arc<EventBus>,
    pub clock: FixedClock,
}

impl Harness {
    /// Guard over in-memory stores with the clock at `now`. The doctor
    /// charges 120 per hour and gives half price on follow-ups.
    pub async fn new(now: DateTime<Utc>) -> Self {
        Self::wrapping(now, |store| store as Arc<dyn AppointmentStore>).await
    }

    /// Like `new`, but the guard sees the in-memory store through `wrap`.
    pub async fn wrapping(
        now: DateTime<Utc>,
        wrap: impl FnOnce(Arc<InMemoryAppointmentStore>) -> Arc<dyn AppointmentStore>,
    ) -> Self {
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let availability = Arc::new(InMemoryAvailabilityStore::new());
        availability
            .set_pricing(DOCTOR, DoctorPricing { hourly_rate: Some(120.0), follow_up_percentage: Some(50) })
            .await;

        let bus = Arc::new(EventBus::local(&RealtimeSettings::default()));
        let clock = FixedClock::new(now);
        let (notifications, _worker) =
            NotificationQueue::start(16, Arc::new(LogOnlyEmailSender), appointments.clone());

        let guard = BookingGuard::new(
            wrap(appointments.clone()),
            availability.clone(),
            bus.clone(),
            notifications,
            BookingRules::default(),
        )
        .with_clock(Arc::new(clock.clone()));

        Self {
            guard: Arc::new(guard),
            appointments,
            availability,
            bus,
            clock,
        }
    }

    pub async fn open(&self, window: AvailabilityWindow) {
        self.availability.save_window(window).await.unwrap();
    }

    pub async fn listen(&self, identity: Identity) -> mpsc::Receiver<Arc<DomainEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.bus.registry().join(identity.clone(), &identity.rooms(), tx).await;
        rx
    }
}

pub async fn next_event(rx: &mut mpsc::Receiver<Arc<DomainEvent>>) -> Arc<DomainEvent> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open")
}
