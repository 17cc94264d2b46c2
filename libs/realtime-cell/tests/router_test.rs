use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use realtime_cell::handlers::RealtimeState;
use realtime_cell::*;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

async fn app_with_accounts(server: &MockServer) -> (axum::Router, TestConfig) {
    let config = TestConfig::with_supabase_url(&server.uri());
    let app_config = config.to_app_config();

    let accounts = Arc::new(SupabaseAccountDirectory::new(&app_config));
    let state = RealtimeState {
        bus: Arc::new(EventBus::local(&app_config.realtime)),
        gatekeeper: Arc::new(Gatekeeper::from_config(&app_config, accounts)),
        settings: app_config.realtime.clone(),
    };

    (create_realtime_router(state), config)
}

fn connect_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let server = MockServer::start().await;
    let (app, _) = app_with_accounts(&server).await;

    let response = app.oneshot(connect_request("/realtime")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deactivated_doctor_is_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", "eq.doc-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_account("doc-7", false)
        ])))
        .mount(&server)
        .await;

    let (app, config) = app_with_accounts(&server).await;
    let token = JwtTestUtils::create_test_token(&TestUser::with_id("doc-7", "doctor"), &config.jwt_secret, None);

    let response = app
        .oneshot(connect_request(&format!("/realtime?token={}", token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn patient_found_in_second_table_passes_admission() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", "eq.pat-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_account("pat-1", true)
        ])))
        .mount(&server)
        .await;

    let (app, config) = app_with_accounts(&server).await;
    let token = JwtTestUtils::create_test_token(&TestUser::with_id("pat-1", "patient"), &config.jwt_secret, None);

    // Admitted, then refused by the upgrade extractor since this is plain HTTP.
    let request = Request::builder()
        .uri("/realtime")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
}
