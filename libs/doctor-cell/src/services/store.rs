use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{AvailabilityError, AvailabilityWindow, DoctorPricing};
use crate::services::time::trim_seconds;

/// Persistence for availability windows and doctor fee settings.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn find_window(&self, doctor_id: &str, date: NaiveDate) -> Result<Option<AvailabilityWindow>, AvailabilityError>;

    /// Stores `window`, replacing whatever was stored for the same doctor and date.
    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError>;

    async fn doctor_pricing(&self, doctor_id: &str) -> Result<DoctorPricing, AvailabilityError>;
}

pub struct SupabaseAvailabilityStore {
    supabase: SupabaseClient,
}

impl SupabaseAvailabilityStore {
    pub fn new(config: &AppConfig) -> Self {
        Self { supabase: SupabaseClient::new(config) }
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn find_window(&self, doctor_id: &str, date: NaiveDate) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&date=eq.{}&limit=1",
            urlencoding::encode(doctor_id),
            date
        );
        let rows: Vec<AvailabilityWindow> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next().map(normalize_window))
    }

    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );

        let body = json!({
            "id": window.id,
            "doctor_id": window.doctor_id,
            "date": window.date,
            "start_time": window.start_time,
            "end_time": window.end_time,
            "slot_duration": window.slot_duration,
            "break_start": window.break_start,
            "break_end": window.break_end,
            "is_available": window.is_available,
            "updated_at": window.updated_at,
        });

        let rows: Vec<AvailabilityWindow> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_availability?on_conflict=doctor_id,date",
                None,
                Some(body),
                Some(headers),
            )
            .await?;

        let saved = rows
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("upsert returned no rows".to_string()))?;
        debug!("Stored availability window {} for doctor {} on {}", saved.id, saved.doctor_id, saved.date);
        Ok(normalize_window(saved))
    }

    async fn doctor_pricing(&self, doctor_id: &str) -> Result<DoctorPricing, AvailabilityError> {
        #[derive(Deserialize)]
        struct PricingRow {
            hourly_rate: Option<f64>,
            follow_up_percentage: Option<u8>,
        }

        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=hourly_rate,follow_up_percentage&limit=1",
            urlencoding::encode(doctor_id)
        );
        let rows: Vec<PricingRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(rows
            .into_iter()
            .next()
            .map(|row| DoctorPricing {
                hourly_rate: row.hourly_rate,
                follow_up_percentage: row.follow_up_percentage,
            })
            .unwrap_or_default())
    }
}

fn normalize_window(mut window: AvailabilityWindow) -> AvailabilityWindow {
    trim_seconds(&mut window.start_time);
    trim_seconds(&mut window.end_time);
    if let Some(value) = window.break_start.as_mut() {
        trim_seconds(value);
    }
    if let Some(value) = window.break_end.as_mut() {
        trim_seconds(value);
    }
    window
}

#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    windows: RwLock<HashMap<(String, NaiveDate), AvailabilityWindow>>,
    pricing: RwLock<HashMap<String, DoctorPricing>>,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_pricing(&self, doctor_id: &str, pricing: DoctorPricing) {
        self.pricing.write().await.insert(doctor_id.to_string(), pricing);
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn find_window(&self, doctor_id: &str, date: NaiveDate) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        Ok(self.windows.read().await.get(&(doctor_id.to_string(), date)).cloned())
    }

    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError> {
        let key = (window.doctor_id.clone(), window.date);
        self.windows.write().await.insert(key, window.clone());
        Ok(window)
    }

    async fn doctor_pricing(&self, doctor_id: &str) -> Result<DoctorPricing, AvailabilityError> {
        Ok(self.pricing.read().await.get(doctor_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_window_and_trims_seconds() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctor_availability"))
            .and(query_param("doctor_id", "eq.doc-1"))
            .and(query_param("date", "eq.2024-03-04"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": id,
                "doctor_id": "doc-1",
                "date": "2024-03-04",
                "start_time": "09:00:00",
                "end_time": "12:00:00",
                "slot_duration": 30,
                "break_start": "10:30:00",
                "break_end": "11:00:00",
                "is_available": true,
                "updated_at": Utc::now()
            }])))
            .mount(&server)
            .await;

        let store = SupabaseAvailabilityStore::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
        let window = store
            .find_window("doc-1", NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(window.id, id);
        assert_eq!(window.start_time, "09:00");
        assert_eq!(window.break_end.as_deref(), Some("11:00"));
    }

    #[tokio::test]
    async fn pricing_comes_from_doctor_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::doctor_account("doc-1", true)
            ])))
            .mount(&server)
            .await;

        let store = SupabaseAvailabilityStore::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config());
        let pricing = store.doctor_pricing("doc-1").await.unwrap();

        assert_eq!(pricing.hourly_rate, Some(120.0));
        assert_eq!(pricing.follow_up_percentage, Some(50));
    }

    #[tokio::test]
    async fn unknown_doctor_has_default_pricing() {
        let store = InMemoryAvailabilityStore::new();
        assert_eq!(store.doctor_pricing("nobody").await.unwrap(), DoctorPricing::default());
    }
}
