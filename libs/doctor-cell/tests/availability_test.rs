use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;

use doctor_cell::handlers::DoctorCellState;
use doctor_cell::*;
use realtime_cell::{EventBus, EventType, Identity, Role};
use shared_config::RealtimeSettings;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn morning() -> UpsertAvailabilityRequest {
    UpsertAvailabilityRequest {
        date: date(),
        start_time: "09:00".to_string(),
        end_time: "12:00".to_string(),
        slot_duration: 30,
        break_start: Some("10:30".to_string()),
        break_end: Some("11:00".to_string()),
        is_available: None,
    }
}

fn service() -> (AvailabilityService, Arc<InMemoryAvailabilityStore>, Arc<EventBus>) {
    let store = Arc::new(InMemoryAvailabilityStore::new());
    let bus = Arc::new(EventBus::local(&RealtimeSettings::default()));
    (AvailabilityService::new(store.clone(), bus.clone()), store, bus)
}

#[tokio::test]
async fn edit_supersedes_window_and_regenerates_slots() {
    let (service, store, _) = service();

    let first = service.upsert_window("doc-1", morning()).await.unwrap();
    let slots: Vec<_> = compute_slots(&first, &[]).into_iter().map(|s| s.start_time).collect();
    assert_eq!(slots, vec!["09:00", "09:30", "10:00", "11:00", "11:30"]);

    let mut shorter = morning();
    shorter.end_time = "10:00".to_string();
    shorter.break_start = None;
    shorter.break_end = None;
    let second = service.upsert_window("doc-1", shorter).await.unwrap();

    assert_eq!(second.id, first.id);
    let stored = store.find_window("doc-1", date()).await.unwrap().unwrap();
    assert_eq!(compute_slots(&stored, &[]).len(), 2);
}

#[tokio::test]
async fn invalid_windows_are_rejected_before_storing() {
    let (service, store, _) = service();

    let mut reversed = morning();
    reversed.start_time = "12:00".to_string();
    reversed.end_time = "09:00".to_string();
    assert_matches!(service.upsert_window("doc-1", reversed).await, Err(AvailabilityError::Validation(_)));

    let mut outside_break = morning();
    outside_break.break_end = Some("12:30".to_string());
    assert_matches!(service.upsert_window("doc-1", outside_break).await, Err(AvailabilityError::Validation(_)));

    let mut half_break = morning();
    half_break.break_end = None;
    assert_matches!(service.upsert_window("doc-1", half_break).await, Err(AvailabilityError::Validation(_)));

    let mut bad_format = morning();
    bad_format.start_time = "9:00".to_string();
    assert_matches!(service.upsert_window("doc-1", bad_format).await, Err(AvailabilityError::Time(_)));

    assert!(store.find_window("doc-1", date()).await.unwrap().is_none());
}

#[tokio::test]
async fn edit_notifies_doctor_and_patients() {
    let (service, _, bus) = service();

    let patient = Identity::new("p1", Role::Patient);
    let (tx, mut rx) = mpsc::channel(4);
    bus.registry().join(patient.clone(), &patient.rooms(), tx).await;

    service.upsert_window("doc-1", morning()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.event_type, EventType::AvailabilityUpdated);
    assert_eq!(event.audience.users, vec!["doc-1"]);
    assert_eq!(event.payload["window"]["slot_duration"], 30);
}

#[tokio::test]
async fn doctors_can_only_edit_their_own_availability() {
    let (service, _, _) = service();
    let config = TestConfig::default();
    let app = doctor_routes(DoctorCellState {
        config: config.to_arc(),
        availability: Arc::new(service),
    });

    let token = JwtTestUtils::create_test_token(&TestUser::with_id("doc-2", "doctor"), &config.jwt_secret, None);
    let request = Request::builder()
        .method("PUT")
        .uri("/doc-1/availability/2024-03-04")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "start_time": "09:00", "end_time": "12:00", "slot_duration": 30 }).to_string(),
        ))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let missing = Request::builder()
        .uri("/doc-1/availability/2024-03-04")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(missing).await.unwrap().status(), StatusCode::NOT_FOUND);
}
