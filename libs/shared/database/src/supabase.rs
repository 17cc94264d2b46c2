use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

use crate::error::{constraint_from_message, DatabaseError, UNIQUE_VIOLATION};

/// Thin PostgREST client. Every call runs with either the caller's bearer token
/// or, when none is given, the anon key.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(key) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", key);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let bearer = auth_token.unwrap_or(&self.anon_key);
        match HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Skipping Authorization header: token contains invalid characters"),
        }

        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token);
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &error_text));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Inserts one row and returns its stored representation.
    pub async fn insert_returning<T>(&self, table: &str, row: Value, auth_token: Option<&str>) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let mut rows: Vec<T> = self.request_with_headers(
            Method::POST,
            &format!("/rest/v1/{}", table),
            auth_token,
            Some(row),
            Some(representation_header()),
        ).await?;

        if rows.is_empty() {
            return Err(DatabaseError::Decode(format!("insert into {} returned no rows", table)));
        }
        Ok(rows.swap_remove(0))
    }

    /// Applies a PATCH filtered by `filter` and returns the updated rows.
    pub async fn update_returning<T>(&self, table: &str, filter: &str, patch: Value, auth_token: Option<&str>) -> Result<Vec<T>, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(
            Method::PATCH,
            &format!("/rest/v1/{}?{}", table, filter),
            auth_token,
            Some(patch),
            Some(representation_header()),
        ).await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

fn representation_header() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn classify_failure(status: StatusCode, error_text: &str) -> DatabaseError {
    let parsed: Option<Value> = serde_json::from_str(error_text).ok();
    let code = parsed.as_ref().and_then(|v| v["code"].as_str());
    let message = parsed
        .as_ref()
        .and_then(|v| v["message"].as_str())
        .unwrap_or(error_text);

    if code == Some(UNIQUE_VIOLATION) {
        debug!("Unique constraint conflict: {}", message);
        return DatabaseError::UniqueViolation {
            constraint: constraint_from_message(message),
        };
    }

    error!("API error ({}): {}", status, error_text);
    match status.as_u16() {
        401 | 403 => DatabaseError::Auth(message.to_string()),
        404 => DatabaseError::NotFound(message.to_string()),
        other => DatabaseError::Api { status: other, message: message.to_string() },
    }
}
