//! Provider endpoints and client registration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// The provider's endpoint locations. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    authorization_endpoint: Url,
    token_endpoint: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revocation_endpoint: Option<Url>,
}

impl ServiceConfig {
    /// Create a service configuration from the two mandatory endpoints.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if an endpoint is not HTTPS (plain HTTP is
    /// accepted for loopback hosts only) or embeds credentials.
    pub fn new(authorization_endpoint: Url, token_endpoint: Url) -> Result<Self> {
        validate_endpoint("authorization endpoint", &authorization_endpoint)?;
        validate_endpoint("token endpoint", &token_endpoint)?;
        Ok(Self {
            authorization_endpoint,
            token_endpoint,
            revocation_endpoint: None,
        })
    }

    /// Parse endpoints from strings, then validate as [`ServiceConfig::new`].
    pub fn parse(authorization_endpoint: &str, token_endpoint: &str) -> Result<Self> {
        Self::new(
            parse_url("authorization endpoint", authorization_endpoint)?,
            parse_url("token endpoint", token_endpoint)?,
        )
    }

    /// Attach an RFC 7009 revocation endpoint.
    pub fn with_revocation_endpoint(mut self, endpoint: Url) -> Result<Self> {
        validate_endpoint("revocation endpoint", &endpoint)?;
        self.revocation_endpoint = Some(endpoint);
        Ok(self)
    }

    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub fn revocation_endpoint(&self) -> Option<&Url> {
        self.revocation_endpoint.as_ref()
    }
}

pub(crate) fn parse_url(what: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| AuthError::InvalidConfig(format!("invalid {what} '{value}': {e}")))
}

/// Validate that an endpoint is safe to send credentials to.
///
/// Endpoints receive authorization codes and tokens, so they must use HTTPS.
/// Loopback HTTP is allowed for local development providers.
pub(crate) fn validate_endpoint(what: &str, url: &Url) -> Result<()> {
    match url.scheme() {
        "https" => {}
        "http" if is_loopback(url) => {}
        scheme => {
            return Err(AuthError::InvalidConfig(format!(
                "{what} must use https, got '{scheme}'"
            )));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(AuthError::InvalidConfig(format!(
            "{what} must not embed credentials"
        )));
    }

    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Everything needed to start an authorization attempt: the provider plus
/// this client's registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub service: ServiceConfig,
    pub client_id: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
}

impl ClientConfig {
    pub fn new(
        service: ServiceConfig,
        client_id: impl Into<String>,
        redirect_uri: Url,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            service,
            client_id: client_id.into(),
            redirect_uri,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}
