//! OpenID Connect discovery.

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::{ServiceConfig, parse_url, validate_endpoint};
use crate::constants::OPENID_CONFIGURATION_PATH;
use crate::error::{AuthError, Result};

/// The fields of an OpenID Provider Configuration this engine uses.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    #[serde(default)]
    issuer: Option<String>,
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    revocation_endpoint: Option<String>,
}

/// Location of the discovery document for `issuer`.
pub fn discovery_url(issuer: &Url) -> Url {
    let mut url = issuer.clone();
    let base = issuer.path().trim_end_matches('/');
    url.set_path(&format!("{base}/{OPENID_CONFIGURATION_PATH}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Fetch `issuer`'s discovery document and build a [`ServiceConfig`] from it.
///
/// # Errors
/// `InvalidConfig` for an unusable issuer or endpoint, `Network` when the
/// document cannot be fetched, `MalformedResponse` when it cannot be used.
pub async fn discover(http: &reqwest::Client, issuer: &Url) -> Result<ServiceConfig> {
    validate_endpoint("issuer", issuer)?;
    let url = discovery_url(issuer);
    debug!(url = %url, "Fetching provider configuration");

    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::MalformedResponse(format!(
            "discovery document at {url} returned HTTP {status}"
        )));
    }

    let body = response.bytes().await?;
    let metadata: ProviderMetadata = serde_json::from_slice(&body)
        .map_err(|e| AuthError::MalformedResponse(format!("invalid discovery document: {e}")))?;

    if let Some(advertised) = &metadata.issuer {
        if advertised.trim_end_matches('/') != issuer.as_str().trim_end_matches('/') {
            return Err(AuthError::MalformedResponse(format!(
                "discovery document issuer '{advertised}' does not match '{issuer}'"
            )));
        }
    }

    let mut config = ServiceConfig::new(
        parse_url("authorization endpoint", &metadata.authorization_endpoint)?,
        parse_url("token endpoint", &metadata.token_endpoint)?,
    )?;
    if let Some(revocation) = &metadata.revocation_endpoint {
        config = config.with_revocation_endpoint(parse_url("revocation endpoint", revocation)?)?;
    }

    info!(
        issuer = %issuer,
        revocation = config.revocation_endpoint().is_some(),
        "Discovered provider configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_discovery_url() {
        let issuer = Url::parse("https://idp.example.com").unwrap();
        assert_eq!(
            discovery_url(&issuer).as_str(),
            "https://idp.example.com/.well-known/openid-configuration"
        );

        let tenant = Url::parse("https://idp.example.com/realms/acme/").unwrap();
        assert_eq!(
            discovery_url(&tenant).as_str(),
            "https://idp.example.com/realms/acme/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn test_discover() {
        let server = MockServer::start().await;
        let issuer = Url::parse(&server.uri()).unwrap();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "revocation_endpoint": format!("{}/revoke", server.uri()),
                "response_types_supported": ["code"]
            })))
            .mount(&server)
            .await;

        let config = discover(&reqwest::Client::new(), &issuer).await.unwrap();
        assert_eq!(config.token_endpoint().path(), "/token");
        assert_eq!(config.revocation_endpoint().unwrap().path(), "/revoke");
    }

    #[tokio::test]
    async fn test_issuer_mismatch_rejected() {
        let server = MockServer::start().await;
        let issuer = Url::parse(&server.uri()).unwrap();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://someone-else.example.com",
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri())
            })))
            .mount(&server)
            .await;

        let err = discover(&reqwest::Client::new(), &issuer).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_document() {
        let server = MockServer::start().await;
        let issuer = Url::parse(&server.uri()).unwrap();
        let err = discover(&reqwest::Client::new(), &issuer).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }
}
