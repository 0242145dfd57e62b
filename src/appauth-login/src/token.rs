//! Token endpoint client: code exchange, refresh and revocation.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::constants::{DEFAULT_TOKEN_TYPE, HTTP_TIMEOUT_SECS, USER_AGENT};
use crate::error::{AuthError, Result, TokenErrorCode};
use crate::redirect::AuthorizationResponse;
use crate::request::AuthorizationRequest;
use crate::secret::Token;

/// Tokens issued by one successful token endpoint call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: Token,
    pub token_type: String,
    /// Absolute expiry. `None` when the provider did not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// A bearer token response without refresh token, id token or scope.
    pub fn bearer(access_token: impl Into<Token>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expires_at,
            refresh_token: None,
            id_token: None,
            scope: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<Token>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Whether the access token is expired at `now`. A token expiring at
    /// exactly `now` is expired; a token without expiry never is.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    fn from_wire(wire: WireTokenResponse, received_at: DateTime<Utc>) -> Result<Self> {
        if wire.access_token.is_empty() {
            return Err(AuthError::MalformedResponse(
                "token response has an empty access_token".into(),
            ));
        }

        let expires_at = match wire.expires_in {
            Some(secs) if secs < 0 => {
                return Err(AuthError::MalformedResponse(format!(
                    "negative expires_in: {secs}"
                )));
            }
            Some(secs) => Some(
                TimeDelta::try_seconds(secs)
                    .and_then(|delta| received_at.checked_add_signed(delta))
                    .ok_or_else(|| {
                        AuthError::MalformedResponse(format!("expires_in out of range: {secs}"))
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            access_token: Token::new(wire.access_token),
            token_type: wire
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at,
            refresh_token: wire.refresh_token.filter(|t| !t.is_empty()).map(Token::new),
            id_token: wire.id_token,
            scope: wire.scope,
        })
    }
}

/// Successful token endpoint body (RFC 6749 §5.1).
#[derive(Deserialize)]
struct WireTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body (RFC 6749 §5.2).
#[derive(Deserialize)]
struct WireErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Which kind of token is being revoked (RFC 7009 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenTypeHint::AccessToken => "access_token",
            TokenTypeHint::RefreshToken => "refresh_token",
        }
    }
}

/// HTTP client for the provider's token and revocation endpoints.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: Client,
}

impl TokenExchangeClient {
    /// Create a client with the crate's user agent and request timeout.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `redirect_uri` and `client_id` come from the original request so the
    /// provider can bind the code to this client.
    pub async fn exchange_code(
        &self,
        request: &AuthorizationRequest,
        response: &AuthorizationResponse,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        debug!(client_id = %request.client_id(), "Exchanging authorization code");
        let tokens = self
            .token_request(
                request.config().token_endpoint(),
                &[
                    ("grant_type", "authorization_code"),
                    ("code", response.code.as_str()),
                    ("redirect_uri", request.redirect_uri().as_str()),
                    ("client_id", request.client_id()),
                    ("code_verifier", code_verifier),
                ],
            )
            .await?;
        info!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_at = ?tokens.expires_at,
            "Token exchange successful"
        );
        Ok(tokens)
    }

    /// Obtain fresh tokens with a refresh token.
    pub async fn refresh(
        &self,
        config: &ServiceConfig,
        client_id: &str,
        refresh_token: &Token,
    ) -> Result<TokenResponse> {
        debug!(client_id = %client_id, "Refreshing access token");
        let tokens = self
            .token_request(
                config.token_endpoint(),
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.expose()),
                    ("client_id", client_id),
                ],
            )
            .await?;
        info!(
            rotated_refresh_token = tokens.refresh_token.is_some(),
            expires_at = ?tokens.expires_at,
            "Token refresh successful"
        );
        Ok(tokens)
    }

    /// Revoke a token at the provider (RFC 7009).
    ///
    /// # Errors
    /// `RevocationUnsupported` if the provider has no revocation endpoint;
    /// otherwise the same taxonomy as the token endpoint.
    pub async fn revoke(
        &self,
        config: &ServiceConfig,
        client_id: &str,
        token: &Token,
        hint: TokenTypeHint,
    ) -> Result<()> {
        let endpoint = config
            .revocation_endpoint()
            .ok_or(AuthError::RevocationUnsupported)?;

        let response = self
            .http
            .post(endpoint.clone())
            .form(&[
                ("token", token.expose()),
                ("token_type_hint", hint.as_str()),
                ("client_id", client_id),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(hint = hint.as_str(), "Token revoked");
            return Ok(());
        }

        let body = response.bytes().await?;
        Err(error_from_body(status, &body))
    }

    async fn token_request(&self, endpoint: &Url, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let received_at = Utc::now();
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = error_from_body(status, &body);
            warn!(status = %status, error = %err, "Token endpoint request failed");
            return Err(err);
        }

        // Some providers report OAuth errors with a 2xx status.
        if let Some(err) = oauth_error(&body) {
            warn!(status = %status, error = %err, "Token endpoint returned an error body");
            return Err(err);
        }

        let wire: WireTokenResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthError::MalformedResponse(format!("invalid token response: {e}")))?;
        TokenResponse::from_wire(wire, received_at)
    }
}

/// Map a non-2xx response to the error taxonomy.
///
/// An OAuth error body wins. Without one, 5xx is treated as a transient
/// `server_error` and anything else as a malformed response.
fn error_from_body(status: StatusCode, body: &[u8]) -> AuthError {
    if let Some(err) = oauth_error(body) {
        return err;
    }

    if status.is_server_error() {
        AuthError::TokenEndpoint {
            code: TokenErrorCode::ServerError,
            description: Some(format!("HTTP {status}")),
        }
    } else {
        AuthError::MalformedResponse(format!("HTTP {status} without an OAuth error body"))
    }
}

/// The error carried by an RFC 6749 §5.2 body, if `body` is one.
fn oauth_error(body: &[u8]) -> Option<AuthError> {
    let wire = serde_json::from_slice::<WireErrorResponse>(body).ok()?;
    Some(AuthError::TokenEndpoint {
        code: TokenErrorCode::from(wire.error),
        description: wire.error_description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> ServiceConfig {
        ServiceConfig::parse(
            &format!("{}/authorize", server.uri()),
            &format!("{}/token", server.uri()),
        )
        .unwrap()
        .with_revocation_endpoint(Url::parse(&format!("{}/revoke", server.uri())).unwrap())
        .unwrap()
    }

    fn client() -> TokenExchangeClient {
        TokenExchangeClient::with_client(Client::new())
    }

    #[test]
    fn test_from_wire_computes_absolute_expiry() {
        let received_at = Utc::now();
        let wire: WireTokenResponse = serde_json::from_str(
            r#"{"access_token":"tok","token_type":"bearer","expires_in":3600,"refresh_token":"r1","scope":"openid"}"#,
        )
        .unwrap();
        let tokens = TokenResponse::from_wire(wire, received_at).unwrap();
        assert_eq!(tokens.access_token.expose(), "tok");
        assert_eq!(tokens.expires_at, Some(received_at + TimeDelta::seconds(3600)));
        assert_eq!(tokens.refresh_token.as_ref().map(Token::expose), Some("r1"));
        assert_eq!(tokens.scope.as_deref(), Some("openid"));
    }

    #[test]
    fn test_from_wire_defaults() {
        let wire: WireTokenResponse = serde_json::from_str(r#"{"access_token":"tok"}"#).unwrap();
        let tokens = TokenResponse::from_wire(wire, Utc::now()).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.expires_at.is_none());
        assert!(!tokens.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_from_wire_rejects_bad_values() {
        let empty: WireTokenResponse = serde_json::from_str(r#"{"access_token":""}"#).unwrap();
        assert!(matches!(
            TokenResponse::from_wire(empty, Utc::now()),
            Err(AuthError::MalformedResponse(_))
        ));

        let negative: WireTokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":-5}"#).unwrap();
        assert!(matches!(
            TokenResponse::from_wire(negative, Utc::now()),
            Err(AuthError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let tokens = TokenResponse::bearer("a", Some(now));
        assert!(tokens.is_expired_at(now));
        assert!(!tokens.is_expired_at(now - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let tokens = TokenResponse::bearer("secret-access", None).with_refresh_token("secret-refresh");
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[tokio::test]
    async fn test_refresh_sends_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "token_type": "Bearer",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client()
            .refresh(&service(&server), "client", &Token::new("r1"))
            .await
            .unwrap();
        assert_eq!(tokens.access_token.expose(), "a2");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_error_body_maps_to_token_endpoint_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked"
            })))
            .mount(&server)
            .await;

        let err = client()
            .refresh(&service(&server), "client", &Token::new("r1"))
            .await
            .unwrap_err();
        match &err {
            AuthError::TokenEndpoint { code, description } => {
                assert_eq!(*code, TokenErrorCode::InvalidGrant);
                assert_eq!(description.as_deref(), Some("refresh token revoked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_error_body_with_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client()
            .refresh(&service(&server), "client", &Token::new("r1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::TokenEndpoint {
                code: TokenErrorCode::InvalidGrant,
                ..
            }
        ));
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_bodiless_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client()
            .refresh(&service(&server), "client", &Token::new("r1"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(!err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client()
            .refresh(&service(&server), "client", &Token::new("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_network_failure() {
        let config = ServiceConfig::parse(
            "http://127.0.0.1:1/authorize",
            "http://127.0.0.1:1/token",
        )
        .unwrap();
        let err = client()
            .refresh(&config, "client", &Token::new("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_revoke() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=r1"))
            .and(body_string_contains("token_type_hint=refresh_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client()
            .revoke(
                &service(&server),
                "client",
                &Token::new("r1"),
                TokenTypeHint::RefreshToken,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_revoke_without_endpoint() {
        let config = ServiceConfig::parse(
            "https://idp.example.com/authorize",
            "https://idp.example.com/token",
        )
        .unwrap();
        let err = client()
            .revoke(&config, "client", &Token::new("a"), TokenTypeHint::AccessToken)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RevocationUnsupported));
    }
}
