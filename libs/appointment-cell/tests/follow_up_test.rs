mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use appointment_cell::*;
use common::*;
use doctor_cell::BookedInterval;
use shared_database::DatabaseError;

fn follow_up(original: uuid::Uuid, on: chrono::NaiveDate, start_time: &str) -> BookFollowUpRequest {
    BookFollowUpRequest {
        doctor_id: DOCTOR.to_string(),
        original_appointment_id: original,
        appointment_date: on,
        start_time: start_time.to_string(),
    }
}

/// A on 2024-01-01 and its follow-up B on 2024-01-10, both completed.
async fn chain(h: &Harness) -> (Appointment, Appointment) {
    let a = completed("p1", date(2024, 1, 1), None);
    let b = completed("p1", date(2024, 1, 10), Some(a.id));
    h.appointments.insert(a.clone()).await.unwrap();
    h.appointments.insert(b.clone()).await.unwrap();
    (a, b)
}

#[tokio::test]
async fn chain_continues_from_the_latest_anchor() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (a, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 13))).await;

    let again = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(a.id, date(2024, 1, 13), "09:00"))
        .await;
    assert_matches!(again, Err(AppointmentError::FollowUpAlreadyBooked));

    let c = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), "09:00"))
        .await
        .unwrap();
    assert!(c.is_follow_up);
    assert_eq!(c.original_appointment_id, Some(b.id));
    assert_eq!(c.status, AppointmentStatus::Pending);
    assert_eq!(c.consultation_fee, 30.0);
}

#[tokio::test]
async fn follow_up_event_is_correlated_with_its_original() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (_, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 13))).await;
    let mut patient_rx = h.listen(patient("p1")).await;

    let c = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), "09:30"))
        .await
        .unwrap();

    let event = next_event(&mut patient_rx).await;
    assert_eq!(event.entity.id, c.id.to_string());
    assert_eq!(event.correlation_id, Some(b.id.to_string()));
}

#[tokio::test]
async fn eligibility_points_at_the_first_anchor_without_a_follow_up() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (_, b) = chain(&h).await;

    let eligibility = h.guard.check_follow_up_eligibility("p1", DOCTOR, None).await.unwrap();
    assert!(eligibility.eligible);
    assert_eq!(eligibility.anchor_appointment_id, Some(b.id));
    assert_eq!(eligibility.window_ends_on, Some(date(2024, 1, 13)));
    assert_eq!(eligibility.follow_up_fee, Some(30.0));
}

#[tokio::test]
async fn quote_uses_the_slot_length_of_the_requested_day() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (_, b) = chain(&h).await;
    let mut hour_slots = morning_window(date(2024, 1, 13));
    hour_slots.slot_duration = 60;
    hour_slots.break_start = None;
    hour_slots.break_end = None;
    h.open(hour_slots).await;

    let eligibility = h.guard.check_follow_up_eligibility("p1", DOCTOR, Some(date(2024, 1, 13))).await.unwrap();
    assert_eq!(eligibility.fee_slot_duration, Some(60));
    assert_eq!(eligibility.follow_up_fee, Some(60.0));

    let booked = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), "10:00"))
        .await
        .unwrap();
    assert_eq!(Some(booked.consultation_fee), eligibility.follow_up_fee);
}

#[tokio::test]
async fn window_closes_three_days_after_completion() {
    let h = Harness::new(at(2024, 1, 14, 8)).await;
    let (_, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 15))).await;

    let eligibility = h.guard.check_follow_up_eligibility("p1", DOCTOR, None).await.unwrap();
    assert!(!eligibility.eligible);
    assert_eq!(eligibility.anchor_appointment_id, Some(b.id));

    let attempt = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 15), "09:00"))
        .await;
    assert_matches!(attempt, Err(AppointmentError::FollowUpNotEligible(_)));
}

#[tokio::test]
async fn active_prescription_extends_the_window() {
    let h = Harness::new(at(2024, 1, 20, 8)).await;
    let (_, b) = chain(&h).await;
    h.appointments.set_prescription(b.id, date(2024, 1, 18)).await;
    h.open(morning_window(date(2024, 1, 21))).await;

    let eligibility = h.guard.check_follow_up_eligibility("p1", DOCTOR, None).await.unwrap();
    assert!(eligibility.eligible);
    assert_eq!(eligibility.window_ends_on, Some(date(2024, 1, 21)));

    let booked = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 21), "11:30"))
        .await
        .unwrap();
    assert_eq!(booked.end_time, "12:00");
}

#[tokio::test]
async fn no_completed_history_means_not_eligible() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;

    let eligibility = h.guard.check_follow_up_eligibility("p1", DOCTOR, None).await.unwrap();
    assert!(!eligibility.eligible);
    assert!(eligibility.anchor_appointment_id.is_none());
    assert!(eligibility.reason.is_some());
}

#[tokio::test]
async fn original_must_belong_to_the_pair_and_be_completed() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (_, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 13))).await;

    let stranger = h
        .guard
        .book_follow_up_appointment(&patient("p2"), follow_up(b.id, date(2024, 1, 13), "09:00"))
        .await;
    assert_matches!(stranger, Err(AppointmentError::FollowUpNotEligible(_)));

    let mut pending = completed("p1", date(2024, 1, 11), None);
    pending.status = AppointmentStatus::Confirmed;
    pending.start_time = "10:00".to_string();
    h.appointments.insert(pending.clone()).await.unwrap();
    let not_done = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(pending.id, date(2024, 1, 13), "09:00"))
        .await;
    assert_matches!(not_done, Err(AppointmentError::FollowUpNotEligible(_)));
}

#[tokio::test]
async fn cancelled_follow_up_frees_the_anchor() {
    let h = Harness::new(at(2024, 1, 12, 8)).await;
    let (_, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 13))).await;

    let c = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), "09:00"))
        .await
        .unwrap();
    h.guard
        .transition_status(
            &patient("p1"),
            c.id,
            StatusChangeRequest { status: AppointmentStatus::Cancelled, reason: Some("clash".to_string()) },
        )
        .await
        .unwrap();

    let rebooked = h
        .guard
        .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), "09:00"))
        .await
        .unwrap();
    assert_eq!(rebooked.original_appointment_id, Some(b.id));
}

/// Never sees an existing follow-up, so every attempt reaches the insert.
struct LaggingFollowUpReads(Arc<InMemoryAppointmentStore>);

#[async_trait]
impl AppointmentStore for LaggingFollowUpReads {
    async fn booked_intervals(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<BookedInterval>, DatabaseError> {
        self.0.booked_intervals(doctor_id, date).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, DatabaseError> {
        self.0.insert(appointment).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        self.0.get(id).await
    }

    async fn completed_between(&self, patient_id: &str, doctor_id: &str) -> Result<Vec<Appointment>, DatabaseError> {
        self.0.completed_between(patient_id, doctor_id).await
    }

    async fn live_follow_up(&self, _original_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(None)
    }

    async fn prescription_end_date(&self, appointment_id: Uuid) -> Result<Option<NaiveDate>, DatabaseError> {
        self.0.prescription_end_date(appointment_id).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Option<Appointment>, DatabaseError> {
        self.0.update_status(id, expected, change).await
    }

    async fn party_contact(&self, party: Party, uid: &str) -> Result<Option<PartyContact>, DatabaseError> {
        self.0.party_contact(party, uid).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_follow_ups_on_one_anchor_have_a_single_winner() {
    let h = Harness::wrapping(at(2024, 1, 12, 8), |store| {
        Arc::new(LaggingFollowUpReads(store)) as Arc<dyn AppointmentStore>
    })
    .await;
    let (_, b) = chain(&h).await;
    h.open(morning_window(date(2024, 1, 13))).await;

    let mut attempts = Vec::new();
    for start_time in ["09:00", "09:30", "10:00", "11:00", "11:30"] {
        let guard = h.guard.clone();
        attempts.push(tokio::spawn(async move {
            guard
                .book_follow_up_appointment(&patient("p1"), follow_up(b.id, date(2024, 1, 13), start_time))
                .await
        }));
    }

    let mut won = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(appointment) => {
                assert_eq!(appointment.original_appointment_id, Some(b.id));
                won += 1;
            }
            Err(e) => assert_matches!(e, AppointmentError::FollowUpAlreadyBooked),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(h.appointments.all().await.len(), 3);
}
