use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::RealtimeError;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub uid: String,
    pub role: Role,
    pub is_active: bool,
}

/// Looks up the doctor or patient account behind an identity token.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account(&self, uid: &str) -> Result<Option<AccountRecord>, RealtimeError>;
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    id: String,
    is_active: Option<bool>,
}

pub struct SupabaseAccountDirectory {
    supabase: SupabaseClient,
}

impl SupabaseAccountDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self { supabase: SupabaseClient::new(config) }
    }

    async fn lookup(&self, table: &str, uid: &str) -> Result<Option<AccountRow>, RealtimeError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&select=id,is_active&limit=1",
            table,
            urlencoding::encode(uid)
        );
        let rows: Vec<AccountRow> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl AccountDirectory for SupabaseAccountDirectory {
    async fn find_account(&self, uid: &str) -> Result<Option<AccountRecord>, RealtimeError> {
        for (table, role) in [("doctors", Role::Doctor), ("patients", Role::Patient)] {
            if let Some(row) = self.lookup(table, uid).await? {
                debug!("Resolved account {} in {}", row.id, table);
                return Ok(Some(AccountRecord {
                    uid: row.id,
                    role,
                    is_active: row.is_active.unwrap_or(true),
                }));
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, uid: &str, role: Role, is_active: bool) {
        self.accounts.write().await.insert(uid.to_string(), AccountRecord {
            uid: uid.to_string(),
            role,
            is_active,
        });
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_account(&self, uid: &str) -> Result<Option<AccountRecord>, RealtimeError> {
        Ok(self.accounts.read().await.get(uid).cloned())
    }
}
