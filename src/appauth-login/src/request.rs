//! Authorization request construction.
//!
//! A request is built once per authorization attempt and wrapped in a
//! [`PendingAuthorization`], which keeps the attempt's anti-forgery state and
//! PKCE verifier together with the one-shot mark that guards its redirect.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, ServiceConfig};
use crate::constants::{RESPONSE_TYPE_CODE, SCOPE_OPENID};
use crate::error::{AuthError, Result};
use crate::pkce::{CodeChallengeMethod, PkceParameters};
use crate::utils::random_token;

/// An immutable authorization request for one attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    config: ServiceConfig,
    client_id: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    state: String,
    nonce: Option<String>,
    login_hint: Option<String>,
    prompt: Option<String>,
    pkce: PkceParameters,
}

impl AuthorizationRequest {
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Space-delimited scope string, or `None` when no scopes were requested.
    pub fn scope_string(&self) -> Option<String> {
        (!self.scopes.is_empty()).then(|| self.scopes.join(" "))
    }

    pub fn response_type(&self) -> &'static str {
        RESPONSE_TYPE_CODE
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn pkce(&self) -> &PkceParameters {
        &self.pkce
    }

    /// The URI to hand to the browser.
    ///
    /// Query parameters already present on the authorization endpoint are
    /// preserved. The PKCE verifier is never part of this URI.
    pub fn to_uri(&self) -> Url {
        let mut url = self.config.authorization_endpoint().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", RESPONSE_TYPE_CODE)
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str());
            if let Some(scope) = self.scope_string() {
                query.append_pair("scope", &scope);
            }
            query
                .append_pair("state", &self.state)
                .append_pair("code_challenge", self.pkce.challenge())
                .append_pair("code_challenge_method", self.pkce.method().as_str());
            if let Some(nonce) = &self.nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(hint) = &self.login_hint {
                query.append_pair("login_hint", hint);
            }
            if let Some(prompt) = &self.prompt {
                query.append_pair("prompt", prompt);
            }
        }
        url
    }
}

/// Builder for [`AuthorizationRequest`].
pub struct AuthorizationRequestBuilder {
    config: ServiceConfig,
    client_id: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    login_hint: Option<String>,
    prompt: Option<String>,
    pkce: Option<PkceParameters>,
}

impl AuthorizationRequestBuilder {
    pub fn new(config: ServiceConfig, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            redirect_uri,
            scopes: Vec::new(),
            login_hint: None,
            prompt: None,
            pkce: None,
        }
    }

    /// Start from a client registration, including its default scopes.
    pub fn from_client(client: &ClientConfig) -> Self {
        Self::new(
            client.service.clone(),
            client.client_id.clone(),
            client.redirect_uri.clone(),
        )
        .scopes(client.scopes.iter().cloned())
    }

    /// Add scopes. Duplicates and empty strings are dropped; order is kept.
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for scope in scopes {
            let scope: String = scope.into();
            let scope = scope.trim();
            if !scope.is_empty() && !self.scopes.iter().any(|s| s == scope) {
                self.scopes.push(scope.to_string());
            }
        }
        self
    }

    pub fn login_hint(mut self, hint: impl Into<String>) -> Self {
        self.login_hint = Some(hint.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Use a caller-provided PKCE pair instead of generating one.
    pub fn pkce(mut self, pkce: PkceParameters) -> Self {
        self.pkce = Some(pkce);
        self
    }

    /// Build the request, drawing a fresh state (and nonce for OIDC).
    ///
    /// # Errors
    /// `InvalidConfig` for an empty client id, a redirect URI carrying a
    /// fragment, or a non-S256 PKCE pair; `Entropy` if randomness is unavailable.
    pub fn build(self) -> Result<AuthorizationRequest> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig("client id must not be empty".into()));
        }
        // RFC 6749 §3.1.2: the redirection endpoint must not include a fragment.
        if self.redirect_uri.fragment().is_some() {
            return Err(AuthError::InvalidConfig(format!(
                "redirect uri '{}' must not contain a fragment",
                self.redirect_uri
            )));
        }

        let pkce = match self.pkce {
            Some(pkce) => pkce,
            None => PkceParameters::generate()?,
        };
        if pkce.method() != CodeChallengeMethod::S256 {
            return Err(AuthError::InvalidConfig(
                "only S256 code challenges are supported".into(),
            ));
        }

        let state = random_token()?;
        let nonce = if self.scopes.iter().any(|s| s == SCOPE_OPENID) {
            Some(random_token()?)
        } else {
            None
        };

        debug!(
            client_id = %self.client_id,
            scopes = ?self.scopes,
            oidc = nonce.is_some(),
            "Built authorization request"
        );

        Ok(AuthorizationRequest {
            config: self.config,
            client_id: self.client_id,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes,
            state,
            nonce,
            login_hint: self.login_hint,
            prompt: self.prompt,
            pkce,
        })
    }
}

/// One-shot guard ensuring an attempt's redirect is processed at most once.
#[derive(Debug, Default)]
pub struct RedirectConsumptionMark(AtomicBool);

impl RedirectConsumptionMark {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Atomically set the mark. Returns `true` only for the caller that set it.
    pub fn try_set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// An authorization attempt awaiting its redirect.
#[derive(Debug)]
pub struct PendingAuthorization {
    request: AuthorizationRequest,
    mark: RedirectConsumptionMark,
}

impl PendingAuthorization {
    pub fn new(request: AuthorizationRequest) -> Self {
        Self {
            request,
            mark: RedirectConsumptionMark::default(),
        }
    }

    pub fn request(&self) -> &AuthorizationRequest {
        &self.request
    }

    /// The URI to hand to the browser.
    pub fn authorization_uri(&self) -> Url {
        self.request.to_uri()
    }

    /// The PKCE verifier needed at token exchange.
    pub fn code_verifier(&self) -> &str {
        self.request.pkce.verifier()
    }

    pub fn is_consumed(&self) -> bool {
        self.mark.is_set()
    }

    pub(crate) fn try_consume(&self) -> bool {
        self.mark.try_set()
    }

    /// Retire the attempt so no later redirect can complete it.
    pub fn abandon(&self) {
        if self.mark.try_set() {
            debug!("Abandoned pending authorization attempt");
        }
    }
}
