use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_utils::jwt::{validate_token, verify_admin_token, ADMIN_ROLE};

use crate::error::RealtimeError;
use crate::models::{Identity, Role};
use crate::services::accounts::AccountDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Not a credential this scheme can verify. The next scheme is tried.
    Unrecognized,
    /// Verified, but the account is switched off. Stops the chain.
    Deactivated,
}

#[async_trait]
pub trait AuthScheme: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_authenticate(&self, token: &str) -> Result<Identity, AuthFailure>;
}

/// Doctor/patient tokens from the identity provider.
pub struct IdentityTokenScheme {
    secret: String,
    accounts: Arc<dyn AccountDirectory>,
}

impl IdentityTokenScheme {
    pub fn new(secret: impl Into<String>, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { secret: secret.into(), accounts }
    }
}

#[async_trait]
impl AuthScheme for IdentityTokenScheme {
    fn name(&self) -> &'static str {
        "identity-token"
    }

    async fn try_authenticate(&self, token: &str) -> Result<Identity, AuthFailure> {
        let user = validate_token(token, &self.secret).map_err(|e| {
            debug!("Identity token rejected: {}", e);
            AuthFailure::Unrecognized
        })?;

        let account = match self.accounts.find_account(&user.id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!("No doctor or patient account for {}", user.id);
                return Err(AuthFailure::Unrecognized);
            }
            Err(e) => {
                warn!("Account lookup failed for {}: {}", user.id, e);
                return Err(AuthFailure::Unrecognized);
            }
        };

        if !account.is_active {
            return Err(AuthFailure::Deactivated);
        }

        Ok(Identity::new(account.uid, account.role))
    }
}

/// Self-issued admin tokens.
pub struct AdminTokenScheme {
    secret: String,
}

impl AdminTokenScheme {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl AuthScheme for AdminTokenScheme {
    fn name(&self) -> &'static str {
        "admin-token"
    }

    async fn try_authenticate(&self, token: &str) -> Result<Identity, AuthFailure> {
        let claims = verify_admin_token(token, &self.secret).map_err(|e| {
            debug!("Admin token rejected: {}", e);
            AuthFailure::Unrecognized
        })?;

        if claims.role != ADMIN_ROLE {
            return Err(AuthFailure::Unrecognized);
        }

        Ok(Identity::new(claims.sub, Role::Admin))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub identity: Identity,
    pub rooms: Vec<String>,
}

/// Admits a live connection through the first scheme that recognises its
/// token.
pub struct Gatekeeper {
    schemes: Vec<Arc<dyn AuthScheme>>,
}

impl Gatekeeper {
    pub fn new(schemes: Vec<Arc<dyn AuthScheme>>) -> Self {
        Self { schemes }
    }

    /// Identity tokens first, then admin tokens.
    pub fn from_config(config: &AppConfig, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self::new(vec![
            Arc::new(IdentityTokenScheme::new(config.supabase_jwt_secret.clone(), accounts)),
            Arc::new(AdminTokenScheme::new(config.admin_jwt_secret.clone())),
        ])
    }

    pub async fn admit(&self, token: &str) -> Result<Admission, RealtimeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RealtimeError::Unauthorized);
        }

        for scheme in &self.schemes {
            match scheme.try_authenticate(token).await {
                Ok(identity) => {
                    info!("Connection admitted as {} ({}) via {}", identity.uid, identity.role, scheme.name());
                    let rooms = identity.rooms();
                    return Ok(Admission { identity, rooms });
                }
                Err(AuthFailure::Deactivated) => {
                    info!("Connection rejected: deactivated account via {}", scheme.name());
                    return Err(RealtimeError::AccountDeactivated);
                }
                Err(AuthFailure::Unrecognized) => continue,
            }
        }

        debug!("Connection rejected: no scheme recognised the token");
        Err(RealtimeError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use shared_utils::jwt::issue_admin_token;
    use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

    use crate::services::accounts::InMemoryAccountDirectory;

    async fn gatekeeper() -> (Gatekeeper, TestConfig) {
        let config = TestConfig::default();
        let accounts = Arc::new(InMemoryAccountDirectory::new());
        accounts.insert("doc-1", Role::Doctor, true).await;
        accounts.insert("pat-off", Role::Patient, false).await;
        (Gatekeeper::from_config(&config.to_app_config(), accounts), config)
    }

    #[tokio::test]
    async fn identity_token_admits_with_account_role() {
        let (gatekeeper, config) = gatekeeper().await;
        // Role claim in the token is ignored; the account table decides.
        let token = JwtTestUtils::create_test_token(&TestUser::with_id("doc-1", "authenticated"), &config.jwt_secret, None);

        let admission = gatekeeper.admit(&token).await.unwrap();
        assert_eq!(admission.identity, Identity::new("doc-1", Role::Doctor));
        assert_eq!(admission.rooms, vec!["user:doc-1", "role:doctor", "doctor:doc-1"]);
    }

    #[tokio::test]
    async fn deactivated_account_is_refused() {
        let (gatekeeper, config) = gatekeeper().await;
        let token = JwtTestUtils::create_test_token(&TestUser::with_id("pat-off", "patient"), &config.jwt_secret, None);

        assert_matches!(gatekeeper.admit(&token).await, Err(RealtimeError::AccountDeactivated));
    }

    #[tokio::test]
    async fn admin_token_falls_through_to_admin_scheme() {
        let (gatekeeper, config) = gatekeeper().await;
        let token = issue_admin_token("root", &config.admin_secret, Duration::hours(1)).unwrap();

        let admission = gatekeeper.admit(&token).await.unwrap();
        assert_eq!(admission.identity, Identity::new("root", Role::Admin));
        assert_eq!(admission.rooms, vec!["user:root", "role:admin", "admin:root"]);
    }

    #[tokio::test]
    async fn every_failure_is_the_same_unauthorized() {
        let (gatekeeper, config) = gatekeeper().await;
        let unknown_account = JwtTestUtils::create_test_token(&TestUser::with_id("ghost", "patient"), &config.jwt_secret, None);
        let wrong_admin_secret = issue_admin_token("root", "some-other-secret", Duration::hours(1)).unwrap();

        for token in [
            unknown_account,
            wrong_admin_secret,
            JwtTestUtils::create_malformed_token(),
            JwtTestUtils::create_invalid_signature_token(&TestUser::with_id("doc-1", "doctor")),
            JwtTestUtils::create_expired_token(&TestUser::with_id("doc-1", "doctor"), &config.jwt_secret),
            "   ".to_string(),
        ] {
            assert_matches!(gatekeeper.admit(&token).await, Err(RealtimeError::Unauthorized));
        }
    }
}
