//! The owned authorization session.
//!
//! An [`AuthSession`] owns one [`AuthState`] for its whole lifetime: it is
//! loaded (or defaulted) on open, persisted after every transition and
//! cleared on sign-out. Transitions that talk to the provider are
//! serialized: a second `complete_authorization` or `refresh` while one is
//! in flight fails with [`AuthError::ConcurrentUpdate`], while `sign_out`
//! waits its turn.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AuthError, Result};
use crate::redirect::RedirectResponseParser;
use crate::request::{AuthorizationRequestBuilder, PendingAuthorization};
use crate::revocation::{RevocationFlow, SignOutReport};
use crate::secret::Token;
use crate::state::{AuthException, AuthState, AuthStatus};
use crate::storage::{CredentialStore, CredentialWriter};
use crate::token::{TokenExchangeClient, TokenResponse};

pub struct AuthSession {
    client: ClientConfig,
    tokens: TokenExchangeClient,
    revocation: RevocationFlow,
    state: RwLock<AuthState>,
    transition: Mutex<()>,
    writer: CredentialWriter,
    store_backend: &'static str,
}

impl AuthSession {
    /// Open a session, restoring the persisted state if there is a usable one.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open(client: ClientConfig, store: CredentialStore, tokens: TokenExchangeClient) -> Self {
        let loader = store.clone();
        let state = match tokio::task::spawn_blocking(move || loader.load()).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load auth state, starting fresh");
                AuthState::default()
            }
        };

        info!(
            backend = store.backend_name(),
            status = %state.status(),
            "Opened auth session"
        );

        let revocation = RevocationFlow::new(
            tokens.clone(),
            client.service.clone(),
            client.client_id.clone(),
        );
        Self {
            store_backend: store.backend_name(),
            writer: CredentialWriter::spawn(store),
            client,
            tokens,
            revocation,
            state: RwLock::new(state),
            transition: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    pub fn store_backend(&self) -> &'static str {
        self.store_backend
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn status(&self) -> AuthStatus {
        self.state.read().status()
    }

    pub fn is_authorized(&self) -> bool {
        self.state.read().is_authorized()
    }

    /// Start an authorization attempt with the client's default scopes.
    pub fn begin_authorization(&self) -> Result<Arc<PendingAuthorization>> {
        self.begin_authorization_with(AuthorizationRequestBuilder::from_client(&self.client))
    }

    /// Start an authorization attempt from a customized builder.
    pub fn begin_authorization_with(
        &self,
        builder: AuthorizationRequestBuilder,
    ) -> Result<Arc<PendingAuthorization>> {
        let request = builder.build()?;
        debug!("Started authorization attempt");
        Ok(Arc::new(PendingAuthorization::new(request)))
    }

    /// Process the redirect for `pending` and exchange its code for tokens.
    ///
    /// # Errors
    /// Parser errors as [`RedirectResponseParser::parse`], token endpoint
    /// errors as [`TokenExchangeClient::exchange_code`], `ConcurrentUpdate`
    /// if another transition is in flight, `Cancelled` if `cancel` fires
    /// during the exchange.
    pub async fn complete_authorization(
        &self,
        pending: &PendingAuthorization,
        redirect: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthStatus> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| AuthError::ConcurrentUpdate)?;

        let response = match RedirectResponseParser::parse(redirect, pending) {
            Ok(response) => response,
            Err(AuthError::Authorization(failure)) => {
                self.transition_state(|state| {
                    state.update_after_authorization(Err(failure.clone()));
                });
                return Err(AuthError::Authorization(failure));
            }
            Err(e) => return Err(e),
        };

        self.transition_state(|state| state.update_after_authorization(Ok(response.clone())));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Code exchange cancelled");
                return Err(AuthError::Cancelled);
            }
            result = self.tokens.exchange_code(pending.request(), &response, pending.code_verifier()) => result,
        };

        self.apply_token_result(result)
    }

    /// Refresh the access token with the stored refresh token.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<AuthStatus> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| AuthError::ConcurrentUpdate)?;

        let refresh_token = self
            .state
            .read()
            .refresh_token()
            .cloned()
            .ok_or(AuthError::MissingRefreshToken)?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Token refresh cancelled");
                return Err(AuthError::Cancelled);
            }
            result = self.tokens.refresh(&self.client.service, &self.client.client_id, &refresh_token) => result,
        };

        self.apply_token_result(result)
    }

    /// An access token that is valid for at least the expiry tolerance,
    /// refreshing first if needed.
    pub async fn fresh_access_token(&self, cancel: &CancellationToken) -> Result<Token> {
        {
            let state = self.state.read();
            if let Some(err) = state.last_exception().and_then(fatal_error) {
                return Err(err);
            }
            if !state.needs_token_refresh() {
                if let Some(token) = state.access_token() {
                    return Ok(token.clone());
                }
            }
            if state.refresh_token().is_none() {
                // Without a refresh token, a token inside the tolerance is still usable.
                return state
                    .last_token_response()
                    .filter(|tokens| !tokens.is_expired_at(Utc::now()))
                    .map(|tokens| tokens.access_token.clone())
                    .ok_or(AuthError::MissingRefreshToken);
            }
        }

        self.refresh(cancel).await?;
        self.state
            .read()
            .access_token()
            .cloned()
            .ok_or(AuthError::MissingRefreshToken)
    }

    /// Force the next [`fresh_access_token`](Self::fresh_access_token) to refresh.
    pub fn set_needs_token_refresh(&self, needs_refresh: bool) {
        self.transition_state(|state| state.set_needs_token_refresh(needs_refresh));
    }

    /// Sign out: clear local state and storage, then revoke at the provider.
    ///
    /// Waits for an in-flight transition to finish rather than failing.
    pub async fn sign_out(&self) -> SignOutReport {
        let guard = self.transition.lock().await;
        let (refresh_token, access_token) = {
            let mut state = self.state.write();
            let tokens = (state.refresh_token().cloned(), state.access_token().cloned());
            state.clear();
            tokens
        };

        // Earlier save failures belong to earlier transitions.
        if let Err(e) = self.writer.flush().await {
            debug!(error = %e, "Discarding earlier persistence failure before sign-out");
        }
        let cleared = match self.writer.clear() {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        drop(guard);

        let storage_error = cleared.err().map(|e| {
            warn!(error = %e, "Failed to clear persisted auth state");
            e.to_string()
        });

        let (refresh_token, access_token) = self
            .revocation
            .revoke_tokens(refresh_token, access_token)
            .await;
        SignOutReport {
            refresh_token,
            access_token,
            storage_error,
        }
    }

    /// Wait for all queued persistence. Returns the first failure since the
    /// previous flush.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    fn apply_token_result(&self, result: Result<TokenResponse>) -> Result<AuthStatus> {
        match result {
            Ok(tokens) => Ok(self.transition_state(|state| {
                state.update(Ok(tokens));
                state.status()
            })),
            Err(e) => {
                if let Some(exception) = AuthException::from_error(&e) {
                    self.transition_state(|state| state.update(Err(exception)));
                }
                Err(e)
            }
        }
    }

    /// Mutate the state and queue its persistence under one write lock, so
    /// queued writes follow the order of transitions.
    fn transition_state<T>(&self, f: impl FnOnce(&mut AuthState) -> T) -> T {
        let mut state = self.state.write();
        let out = f(&mut state);
        if let Err(e) = self.writer.save(&state) {
            warn!(error = %e, "Failed to queue auth state for persistence");
        }
        out
    }
}

/// The error a fatal recorded exception stands for.
fn fatal_error(exception: &AuthException) -> Option<AuthError> {
    match exception {
        AuthException::Authorization(failure) => Some(AuthError::Authorization(failure.clone())),
        AuthException::TokenEndpoint { code, description } if !code.is_transient() => {
            Some(AuthError::TokenEndpoint {
                code: code.clone(),
                description: description.clone(),
            })
        }
        _ => None,
    }
}
