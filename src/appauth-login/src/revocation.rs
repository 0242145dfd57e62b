//! Sign-out with best-effort token revocation.

use std::fmt;

use appauth_keyring_store::StoreError;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::AuthError;
use crate::secret::Token;
use crate::state::AuthState;
use crate::storage::CredentialStore;
use crate::token::{TokenExchangeClient, TokenTypeHint};

/// What happened to one token at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationOutcome {
    /// There was no such token to revoke.
    NoToken,
    /// The provider has no revocation endpoint.
    Unsupported,
    Revoked,
    Failed(String),
}

impl fmt::Display for RevocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevocationOutcome::NoToken => f.write_str("no token"),
            RevocationOutcome::Unsupported => f.write_str("not supported by provider"),
            RevocationOutcome::Revoked => f.write_str("revoked"),
            RevocationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of a sign-out. Local state is always cleared; the rest is
/// informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutReport {
    pub refresh_token: RevocationOutcome,
    pub access_token: RevocationOutcome,
    /// Set when removing the persisted state failed.
    pub storage_error: Option<String>,
}

impl SignOutReport {
    /// Whether every step succeeded or had nothing to do.
    pub fn is_complete(&self) -> bool {
        self.storage_error.is_none()
            && !matches!(self.refresh_token, RevocationOutcome::Failed(_))
            && !matches!(self.access_token, RevocationOutcome::Failed(_))
    }
}

/// Discards credentials locally and revokes them at the provider.
#[derive(Debug, Clone)]
pub struct RevocationFlow {
    client: TokenExchangeClient,
    config: ServiceConfig,
    client_id: String,
}

impl RevocationFlow {
    pub fn new(client: TokenExchangeClient, config: ServiceConfig, client_id: impl Into<String>) -> Self {
        Self {
            client,
            config,
            client_id: client_id.into(),
        }
    }

    /// Reset `state`, clear `store`, then revoke the tokens `state` held.
    ///
    /// Local sign-out never depends on the provider: revocation and storage
    /// failures are logged and reported, not returned.
    pub async fn sign_out(&self, state: &mut AuthState, store: &CredentialStore) -> SignOutReport {
        let refresh_token = state.refresh_token().cloned();
        let access_token = state.access_token().cloned();
        state.clear();

        let store = store.clone();
        let cleared = tokio::task::spawn_blocking(move || store.clear())
            .await
            .unwrap_or_else(|e| {
                Err(AuthError::Storage(StoreError::Internal(format!(
                    "spawn_blocking failed: {e}"
                ))))
            });
        let storage_error = cleared.err().map(|e| {
            warn!(error = %e, "Failed to clear persisted auth state");
            e.to_string()
        });

        let (refresh_token, access_token) = self.revoke_tokens(refresh_token, access_token).await;
        SignOutReport {
            refresh_token,
            access_token,
            storage_error,
        }
    }

    /// Revoke the refresh token, then the access token.
    pub async fn revoke_tokens(
        &self,
        refresh_token: Option<Token>,
        access_token: Option<Token>,
    ) -> (RevocationOutcome, RevocationOutcome) {
        let refresh = self
            .revoke_one(refresh_token.as_ref(), TokenTypeHint::RefreshToken)
            .await;
        let access = self
            .revoke_one(access_token.as_ref(), TokenTypeHint::AccessToken)
            .await;
        info!(refresh = %refresh, access = %access, "Signed out");
        (refresh, access)
    }

    async fn revoke_one(&self, token: Option<&Token>, hint: TokenTypeHint) -> RevocationOutcome {
        let Some(token) = token else {
            return RevocationOutcome::NoToken;
        };
        if self.config.revocation_endpoint().is_none() {
            debug!(hint = hint.as_str(), "No revocation endpoint, discarding token locally");
            return RevocationOutcome::Unsupported;
        }

        match self.client.revoke(&self.config, &self.client_id, token, hint).await {
            Ok(()) => RevocationOutcome::Revoked,
            Err(AuthError::RevocationUnsupported) => RevocationOutcome::Unsupported,
            Err(e) => {
                warn!(hint = hint.as_str(), error = %e, "Token revocation failed");
                RevocationOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenResponse;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authorized_state() -> AuthState {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", None).with_refresh_token("r1")));
        state
    }

    fn flow(config: ServiceConfig) -> RevocationFlow {
        RevocationFlow::new(
            TokenExchangeClient::with_client(reqwest::Client::new()),
            config,
            "client",
        )
    }

    fn config_for(server: &MockServer) -> ServiceConfig {
        ServiceConfig::parse(
            &format!("{}/authorize", server.uri()),
            &format!("{}/token", server.uri()),
        )
        .unwrap()
        .with_revocation_endpoint(Url::parse(&format!("{}/revoke", server.uri())).unwrap())
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_out_revokes_both_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token_type_hint=refresh_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token_type_hint=access_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = CredentialStore::memory();
        let mut state = authorized_state();
        store.save(&state).unwrap();

        let report = flow(config_for(&server)).sign_out(&mut state, &store).await;
        assert_eq!(report.refresh_token, RevocationOutcome::Revoked);
        assert_eq!(report.access_token, RevocationOutcome::Revoked);
        assert!(report.is_complete());
        assert!(!state.is_authorized());
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_revocation_failure_does_not_block_sign_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = CredentialStore::memory();
        let mut state = authorized_state();
        store.save(&state).unwrap();

        let report = flow(config_for(&server)).sign_out(&mut state, &store).await;
        assert!(matches!(report.refresh_token, RevocationOutcome::Failed(_)));
        assert!(!report.is_complete());
        assert_eq!(state, AuthState::new());
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_without_revocation_endpoint() {
        let config = ServiceConfig::parse(
            "https://idp.example.com/authorize",
            "https://idp.example.com/token",
        )
        .unwrap();
        let store = CredentialStore::memory();
        let mut state = authorized_state();

        let report = flow(config).sign_out(&mut state, &store).await;
        assert_eq!(report.refresh_token, RevocationOutcome::Unsupported);
        assert_eq!(report.access_token, RevocationOutcome::Unsupported);
        assert!(report.is_complete());
        assert!(!state.is_authorized());
    }

    #[tokio::test]
    async fn test_sign_out_when_already_signed_out() {
        let server = MockServer::start().await;
        let store = CredentialStore::memory();
        let mut state = AuthState::new();

        let report = flow(config_for(&server)).sign_out(&mut state, &store).await;
        assert_eq!(report.refresh_token, RevocationOutcome::NoToken);
        assert_eq!(report.access_token, RevocationOutcome::NoToken);
    }
}
