//! Error taxonomy for the authorization flow.

use std::fmt;

use appauth_keyring_store::StoreError;
use serde::{Deserialize, Serialize};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors produced by the authorization, token and persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Transport-level failure talking to the provider. Retriable.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The token endpoint rejected the grant.
    #[error("token endpoint error: {code}{}", fmt_description(.description))]
    TokenEndpoint {
        code: TokenErrorCode,
        description: Option<String>,
    },

    /// The authorization step failed (consent denied, provider failure).
    #[error("authorization failed: {0}")]
    Authorization(AuthorizationError),

    /// The redirect's state did not match the pending request.
    #[error("CSRF attack detected: state parameter mismatch")]
    StateMismatch,

    /// The redirect for this attempt was already processed.
    #[error("redirect already consumed for this authorization attempt")]
    AlreadyConsumed,

    /// Persisted auth state could not be parsed.
    #[error("failed to deserialize auth state: {0}")]
    Deserialization(String),

    /// Auth state could not be serialized for persistence.
    #[error("failed to serialize auth state: {0}")]
    Serialization(String),

    /// Another state transition is in flight.
    #[error("another auth state transition is in progress")]
    ConcurrentUpdate,

    /// The OS entropy source failed.
    #[error("entropy source failure: {0}")]
    Entropy(String),

    /// Client or service configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The redirect was malformed or not addressed to this client.
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    /// A 2xx response whose body is not what the protocol requires.
    #[error("malformed response from provider: {0}")]
    MalformedResponse(String),

    /// A refresh was requested but the state holds no refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// Revocation was requested but the provider has no revocation endpoint.
    #[error("provider does not expose a revocation endpoint")]
    RevocationUnsupported,

    /// The persistence collaborator failed.
    #[error("credential storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

fn fmt_description(description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!(" - {d}"),
        _ => String::new(),
    }
}

impl AuthError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            AuthError::Network(_) | AuthError::ConcurrentUpdate | AuthError::Storage(_) => true,
            AuthError::TokenEndpoint { code, .. } => code.is_transient(),
            _ => false,
        }
    }

    /// Whether the user must go through a fresh authorization to recover.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            AuthError::TokenEndpoint { code, .. } => !code.is_transient(),
            AuthError::Authorization(_)
            | AuthError::StateMismatch
            | AuthError::MissingRefreshToken => true,
            _ => false,
        }
    }

    /// Conditions that should not be surfaced to the user as failures.
    pub fn is_informational(&self) -> bool {
        matches!(self, AuthError::AlreadyConsumed | AuthError::Cancelled)
    }
}

/// Standard error codes returned on the authorization redirect (RFC 6749 §4.1.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthorizationErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    /// OIDC: the provider needs user interaction (`login_required` etc.).
    LoginRequired,
    ConsentRequired,
    InteractionRequired,
    Other(String),
}

impl AuthorizationErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::LoginRequired => "login_required",
            Self::ConsentRequired => "consent_required",
            Self::InteractionRequired => "interaction_required",
            Self::Other(code) => code,
        }
    }
}

impl From<&str> for AuthorizationErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "invalid_request" => Self::InvalidRequest,
            "unauthorized_client" => Self::UnauthorizedClient,
            "access_denied" => Self::AccessDenied,
            "unsupported_response_type" => Self::UnsupportedResponseType,
            "invalid_scope" => Self::InvalidScope,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            "login_required" => Self::LoginRequired,
            "consent_required" => Self::ConsentRequired,
            "interaction_required" => Self::InteractionRequired,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for AuthorizationErrorCode {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<AuthorizationErrorCode> for String {
    fn from(code: AuthorizationErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes returned by the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    Other(String),
}

impl TokenErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::Other(code) => code,
        }
    }

    /// Provider-side hiccups that clear up without user involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServerError | Self::TemporarilyUnavailable)
    }
}

impl From<&str> for TokenErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "invalid_request" => Self::InvalidRequest,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TokenErrorCode {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<TokenErrorCode> for String {
    fn from(code: TokenErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure variant of an authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationError {
    pub code: AuthorizationErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl AuthorizationError {
    pub fn new(code: impl Into<AuthorizationErrorCode>, description: Option<String>) -> Self {
        Self {
            code: code.into(),
            description,
            uri: None,
        }
    }
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.code, fmt_description(&self.description))
    }
}
