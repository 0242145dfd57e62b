//! Persisted authorization state and its transitions.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EXPIRY_TOLERANCE_SECS;
use crate::error::{AuthError, AuthorizationError, Result, TokenErrorCode};
use crate::redirect::AuthorizationResponse;
use crate::secret::Token;
use crate::token::TokenResponse;

/// The last failure recorded against an [`AuthState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthException {
    /// The provider refused the authorization.
    Authorization(AuthorizationError),
    /// The token endpoint rejected a grant.
    TokenEndpoint {
        code: TokenErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// The provider could not be reached.
    Network { message: String },
    /// The provider answered with something that is not OAuth.
    Protocol { message: String },
}

impl AuthException {
    /// Fatal exceptions make the state unusable until the user authorizes again.
    pub fn is_fatal(&self) -> bool {
        match self {
            AuthException::Authorization(_) => true,
            AuthException::TokenEndpoint { code, .. } => !code.is_transient(),
            AuthException::Network { .. } | AuthException::Protocol { .. } => false,
        }
    }

    /// The exception an error leaves behind in the state, if any.
    ///
    /// Local conditions (cancellation, contention, storage) never touch the
    /// state and map to `None`.
    pub fn from_error(error: &AuthError) -> Option<Self> {
        match error {
            AuthError::Authorization(failure) => Some(AuthException::Authorization(failure.clone())),
            AuthError::TokenEndpoint { code, description } => Some(AuthException::TokenEndpoint {
                code: code.clone(),
                description: description.clone(),
            }),
            AuthError::Network(e) => Some(AuthException::Network {
                message: e.to_string(),
            }),
            AuthError::MalformedResponse(message) => Some(AuthException::Protocol {
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for AuthException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthException::Authorization(failure) => write!(f, "authorization failed: {failure}"),
            AuthException::TokenEndpoint { code, description } => match description {
                Some(d) => write!(f, "token endpoint error: {code} - {d}"),
                None => write!(f, "token endpoint error: {code}"),
            },
            AuthException::Network { message } => write!(f, "network error: {message}"),
            AuthException::Protocol { message } => write!(f, "protocol error: {message}"),
        }
    }
}

/// Where an [`AuthState`] stands, derived from its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    PendingExchange,
    Authorized,
    ExpiredRefreshable,
    Error,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::PendingExchange => "pending exchange",
            AuthStatus::Authorized => "authorized",
            AuthStatus::ExpiredRefreshable => "expired (refreshable)",
            AuthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Current tokens plus the outcome of the last authorization and token
/// requests.
///
/// Once a refresh token has been issued it is kept across token updates
/// that omit one; only a new authorization or sign-out discards it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_authorization_response: Option<AuthorizationResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_token_response: Option<TokenResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_exception: Option<AuthException>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    needs_token_refresh: bool,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the outcome of a token endpoint call.
    pub fn update(&mut self, result: std::result::Result<TokenResponse, AuthException>) {
        match result {
            Ok(tokens) => {
                if let Some(refresh_token) = &tokens.refresh_token {
                    self.refresh_token = Some(refresh_token.clone());
                }
                if let Some(scope) = &tokens.scope {
                    self.scope = Some(scope.clone());
                }
                self.last_token_response = Some(tokens);
                self.last_exception = None;
                self.needs_token_refresh = false;
            }
            Err(exception) => {
                self.last_exception = Some(exception);
            }
        }
    }

    /// Apply the outcome of an authorization redirect.
    ///
    /// A new grant supersedes every token obtained under the previous one.
    pub fn update_after_authorization(
        &mut self,
        result: std::result::Result<AuthorizationResponse, AuthorizationError>,
    ) {
        match result {
            Ok(response) => {
                self.scope = response.scope.clone();
                self.last_authorization_response = Some(response);
                self.last_token_response = None;
                self.refresh_token = None;
                self.last_exception = None;
                self.needs_token_refresh = false;
            }
            Err(failure) => {
                self.last_exception = Some(AuthException::Authorization(failure));
            }
        }
    }

    /// Reset to the unauthenticated state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn access_token(&self) -> Option<&Token> {
        self.last_token_response.as_ref().map(|t| &t.access_token)
    }

    pub fn access_token_expiration(&self) -> Option<DateTime<Utc>> {
        self.last_token_response.as_ref().and_then(|t| t.expires_at)
    }

    pub fn id_token(&self) -> Option<&str> {
        self.last_token_response
            .as_ref()
            .and_then(|t| t.id_token.as_deref())
    }

    pub fn refresh_token(&self) -> Option<&Token> {
        self.refresh_token.as_ref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn last_authorization_response(&self) -> Option<&AuthorizationResponse> {
        self.last_authorization_response.as_ref()
    }

    pub fn last_token_response(&self) -> Option<&TokenResponse> {
        self.last_token_response.as_ref()
    }

    pub fn last_exception(&self) -> Option<&AuthException> {
        self.last_exception.as_ref()
    }

    pub fn has_fatal_exception(&self) -> bool {
        self.last_exception.as_ref().is_some_and(AuthException::is_fatal)
    }

    pub fn is_authorized(&self) -> bool {
        self.is_authorized_at(Utc::now())
    }

    pub fn is_authorized_at(&self, now: DateTime<Utc>) -> bool {
        !self.has_fatal_exception() && (self.has_valid_access_token(now) || self.refresh_token.is_some())
    }

    pub fn status(&self) -> AuthStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> AuthStatus {
        if self.has_fatal_exception() {
            AuthStatus::Error
        } else if self.has_valid_access_token(now) {
            AuthStatus::Authorized
        } else if self.refresh_token.is_some() {
            AuthStatus::ExpiredRefreshable
        } else if self.last_authorization_response.is_some() && self.last_token_response.is_none() {
            AuthStatus::PendingExchange
        } else {
            AuthStatus::Unauthenticated
        }
    }

    pub fn needs_token_refresh(&self) -> bool {
        self.needs_token_refresh_at(Utc::now())
    }

    /// Whether the access token should be refreshed before use: forced by
    /// [`set_needs_token_refresh`](Self::set_needs_token_refresh), missing,
    /// or expiring within [`EXPIRY_TOLERANCE_SECS`].
    pub fn needs_token_refresh_at(&self, now: DateTime<Utc>) -> bool {
        if self.needs_token_refresh {
            return true;
        }
        match &self.last_token_response {
            None => true,
            Some(tokens) => tokens
                .expires_at
                .is_some_and(|expires_at| now + TimeDelta::seconds(EXPIRY_TOLERANCE_SECS) >= expires_at),
        }
    }

    pub fn set_needs_token_refresh(&mut self, needs_refresh: bool) {
        self.needs_token_refresh = needs_refresh;
    }

    pub fn json_serialize_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AuthError::Serialization(e.to_string()))
    }

    /// Parse a state produced by [`json_serialize_string`](Self::json_serialize_string).
    ///
    /// # Errors
    /// `Deserialization` for malformed or truncated input; no partial state
    /// is ever returned.
    pub fn json_deserialize(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AuthError::Deserialization(e.to_string()))
    }

    fn has_valid_access_token(&self, now: DateTime<Utc>) -> bool {
        self.last_token_response
            .as_ref()
            .is_some_and(|tokens| !tokens.is_expired_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthorizationErrorCode;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    fn authorization(code: &str) -> AuthorizationResponse {
        AuthorizationResponse {
            code: code.to_string(),
            state: "s1".to_string(),
            scope: Some("openid".to_string()),
        }
    }

    #[test]
    fn test_refresh_token_retained_across_updates() {
        let mut state = AuthState::new();
        state.update(Ok(
            TokenResponse::bearer("a1", Some(t0() + secs(3600))).with_refresh_token("r1"),
        ));
        state.update(Ok(TokenResponse::bearer("a2", Some(t0() + secs(7200)))));

        assert_eq!(state.access_token().map(Token::expose), Some("a2"));
        assert_eq!(state.refresh_token().map(Token::expose), Some("r1"));
        assert_eq!(state.access_token_expiration(), Some(t0() + secs(7200)));
    }

    #[test]
    fn test_rotated_refresh_token_replaces_old() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", None).with_refresh_token("r1")));
        state.update(Ok(TokenResponse::bearer("a2", None).with_refresh_token("r2")));
        assert_eq!(state.refresh_token().map(Token::expose), Some("r2"));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", Some(t0()))));

        assert!(state.is_authorized_at(t0() - secs(1)));
        assert!(!state.is_authorized_at(t0()));
        assert_eq!(state.status_at(t0()), AuthStatus::Unauthenticated);
    }

    #[test]
    fn test_expired_with_refresh_token_is_refreshable() {
        let mut state = AuthState::new();
        state.update(Ok(
            TokenResponse::bearer("a1", Some(t0())).with_refresh_token("r1"),
        ));
        assert!(state.is_authorized_at(t0() + secs(10)));
        assert_eq!(state.status_at(t0() + secs(10)), AuthStatus::ExpiredRefreshable);
        assert_eq!(state.status_at(t0() - secs(10)), AuthStatus::Authorized);
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", None)));
        assert!(state.is_authorized_at(t0() + secs(10 * 365 * 24 * 3600)));
        assert!(!state.needs_token_refresh_at(t0()));
    }

    #[test]
    fn test_authorization_flow_states() {
        let mut state = AuthState::new();
        assert_eq!(state.status_at(t0()), AuthStatus::Unauthenticated);

        state.update_after_authorization(Ok(authorization("abc")));
        assert_eq!(state.status_at(t0()), AuthStatus::PendingExchange);
        assert!(!state.is_authorized_at(t0()));
        assert_eq!(state.scope(), Some("openid"));

        state.update(Ok(TokenResponse::bearer("tok", Some(t0() + secs(3600)))));
        assert_eq!(state.status_at(t0()), AuthStatus::Authorized);
    }

    #[test]
    fn test_new_authorization_discards_previous_grant() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", None).with_refresh_token("r1")));
        state.update_after_authorization(Ok(authorization("def")));

        assert!(state.access_token().is_none());
        assert!(state.refresh_token().is_none());
        assert_eq!(state.status_at(t0()), AuthStatus::PendingExchange);
    }

    #[test]
    fn test_authorization_error_is_fatal() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", None).with_refresh_token("r1")));
        state.update_after_authorization(Err(AuthorizationError::new(
            AuthorizationErrorCode::AccessDenied,
            None,
        )));

        assert_eq!(state.status_at(t0()), AuthStatus::Error);
        assert!(!state.is_authorized_at(t0()));
        // Tokens are kept, only the derived status changes.
        assert!(state.refresh_token().is_some());
    }

    #[test]
    fn test_exception_fatality() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("a1", Some(t0())).with_refresh_token("r1")));

        state.update(Err(AuthException::Network {
            message: "connection reset".into(),
        }));
        assert!(state.is_authorized_at(t0()));

        state.update(Err(AuthException::TokenEndpoint {
            code: TokenErrorCode::TemporarilyUnavailable,
            description: None,
        }));
        assert!(state.is_authorized_at(t0()));

        state.update(Err(AuthException::TokenEndpoint {
            code: TokenErrorCode::InvalidGrant,
            description: None,
        }));
        assert!(!state.is_authorized_at(t0()));
        assert_eq!(state.status_at(t0()), AuthStatus::Error);

        // A later success clears the exception.
        state.update(Ok(TokenResponse::bearer("a2", Some(t0() + secs(60)))));
        assert_eq!(state.status_at(t0()), AuthStatus::Authorized);
        assert!(state.last_exception().is_none());
    }

    #[test]
    fn test_needs_token_refresh() {
        let mut state = AuthState::new();
        assert!(state.needs_token_refresh_at(t0()));

        state.update(Ok(TokenResponse::bearer("a1", Some(t0() + secs(3600)))));
        assert!(!state.needs_token_refresh_at(t0()));
        assert!(state.needs_token_refresh_at(t0() + secs(3600 - EXPIRY_TOLERANCE_SECS)));

        state.set_needs_token_refresh(true);
        assert!(state.needs_token_refresh_at(t0()));

        state.update(Ok(TokenResponse::bearer("a2", Some(t0() + secs(3600)))));
        assert!(!state.needs_token_refresh_at(t0()));
    }

    #[test]
    fn test_json_round_trip() {
        let mut state = AuthState::new();
        state.update_after_authorization(Ok(authorization("abc")));
        state.update(Ok(TokenResponse::bearer("tok", Some(t0() + secs(3600)))
            .with_refresh_token("r1")
            .with_scope("openid profile")));
        state.update(Err(AuthException::Network {
            message: "timeout".into(),
        }));

        let json = state.json_serialize_string().unwrap();
        assert!(json.contains("\"refreshToken\":\"r1\""));
        let restored = AuthState::json_deserialize(&json).unwrap();
        assert_eq!(restored, state);

        let empty = AuthState::json_deserialize(&AuthState::new().json_serialize_string().unwrap())
            .unwrap();
        assert_eq!(empty, AuthState::new());
    }

    #[test]
    fn test_fatal_exception_round_trips() {
        let mut state = AuthState::new();
        state.update_after_authorization(Err(AuthorizationError::new(
            AuthorizationErrorCode::AccessDenied,
            Some("nope".into()),
        )));
        let restored = AuthState::json_deserialize(&state.json_serialize_string().unwrap()).unwrap();
        assert_eq!(restored.status_at(t0()), AuthStatus::Error);
    }

    #[test]
    fn test_truncated_json_rejected() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("tok", None).with_refresh_token("r1")));
        let json = state.json_serialize_string().unwrap();

        for cut in [1, json.len() / 2, json.len() - 1] {
            let err = AuthState::json_deserialize(&json[..cut]).unwrap_err();
            assert!(matches!(err, AuthError::Deserialization(_)));
        }
        assert!(matches!(
            AuthState::json_deserialize("not json"),
            Err(AuthError::Deserialization(_))
        ));
    }

    #[test]
    fn test_exception_from_error() {
        let err = AuthError::TokenEndpoint {
            code: TokenErrorCode::InvalidGrant,
            description: None,
        };
        assert!(AuthException::from_error(&err).unwrap().is_fatal());
        assert!(AuthException::from_error(&AuthError::Cancelled).is_none());
        assert!(AuthException::from_error(&AuthError::ConcurrentUpdate).is_none());
    }
}
