//! Authorization redirect parsing.
//!
//! SECURITY: the redirect carries an authorization code for whoever holds
//! the matching PKCE verifier. The parser only accepts a redirect that is
//! addressed to the registered redirect URI, echoes this attempt's state,
//! and has not been processed before.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, AuthorizationError, Result};
use crate::request::PendingAuthorization;
use crate::utils::constant_time_compare;

/// Success variant of an authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
    /// Granted scope: echoed by the provider, or the requested scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Turns a redirect URI into exactly one authorization outcome.
pub struct RedirectResponseParser;

impl RedirectResponseParser {
    /// Parse the redirect delivered for `pending`.
    ///
    /// Returns the authorization response on success. A provider-reported
    /// failure comes back as [`AuthError::Authorization`].
    ///
    /// # Errors
    /// - `AlreadyConsumed` if this attempt's redirect was already processed.
    /// - `InvalidRedirect` if the URI is unparseable, not addressed to the
    ///   registered redirect URI, or carries neither a code nor an error.
    /// - `StateMismatch` if the state is missing or wrong; the attempt is
    ///   abandoned so a later redirect cannot complete it.
    pub fn parse(redirect: &str, pending: &PendingAuthorization) -> Result<AuthorizationResponse> {
        if pending.is_consumed() {
            debug!("Ignoring redirect for an already consumed attempt");
            return Err(AuthError::AlreadyConsumed);
        }

        let request = pending.request();
        let url = Url::parse(redirect.trim())
            .map_err(|e| AuthError::InvalidRedirect(format!("unparseable redirect uri: {e}")))?;
        if !matches_registered(&url, request.redirect_uri()) {
            return Err(AuthError::InvalidRedirect(format!(
                "redirect is not addressed to {}",
                request.redirect_uri()
            )));
        }

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        // SECURITY: a missing or mismatched state indicates a forged or
        // replayed redirect. Retire the attempt even if a code is present.
        let state_ok = params
            .get("state")
            .is_some_and(|received| constant_time_compare(request.state(), received));
        if !state_ok {
            warn!("Redirect state mismatch, abandoning authorization attempt");
            pending.abandon();
            return Err(AuthError::StateMismatch);
        }

        if !pending.try_consume() {
            debug!("Lost race to consume redirect");
            return Err(AuthError::AlreadyConsumed);
        }

        if let Some(error) = params.get("error") {
            let mut failure = AuthorizationError::new(
                error.as_str(),
                params.get("error_description").cloned(),
            );
            failure.uri = params.get("error_uri").cloned();
            debug!(code = %failure.code, "Provider reported authorization failure");
            return Err(AuthError::Authorization(failure));
        }

        let code = params
            .get("code")
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                AuthError::InvalidRedirect("redirect carries neither code nor error".into())
            })?;

        debug!("Authorization redirect accepted");

        Ok(AuthorizationResponse {
            code: code.clone(),
            state: request.state().to_string(),
            scope: params
                .get("scope")
                .cloned()
                .or_else(|| request.scope_string()),
        })
    }
}

fn matches_registered(received: &Url, registered: &Url) -> bool {
    received.scheme() == registered.scheme()
        && received.host_str() == registered.host_str()
        && received.port_or_known_default() == registered.port_or_known_default()
        && received.path() == registered.path()
}
