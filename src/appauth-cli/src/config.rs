//! CLI configuration file.
//!
//! ```toml
//! client_id = "native-app"
//! redirect_uri = "com.example.app:/oauth2redirect"
//! scopes = ["openid", "profile", "offline_access"]
//! credentials_store = "keyring"  # keyring | file | memory
//!
//! # Either discover the endpoints from an issuer...
//! issuer = "https://accounts.example.com"
//!
//! # ...or list them explicitly.
//! [service]
//! authorization_endpoint = "https://accounts.example.com/authorize"
//! token_endpoint = "https://accounts.example.com/token"
//! revocation_endpoint = "https://accounts.example.com/revoke"
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use appauth_login::storage::default_home;
use appauth_login::{ClientConfig, CredentialStore, EncryptedFileStore, ServiceConfig};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "APPAUTH_CONFIG";

/// Config file name inside the appauth home.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsStoreKind {
    /// OS keychain, with encrypted files when the keychain is unavailable.
    #[default]
    Keyring,
    /// Encrypted files only.
    File,
    /// Nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub client_id: String,
    pub redirect_uri: Url,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub issuer: Option<Url>,
    #[serde(default)]
    pub service: Option<ServiceSection>,
    #[serde(default)]
    pub credentials_store: CredentialsStoreKind,
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).context("Invalid config file")?;
        if config.client_id.trim().is_empty() {
            bail!("client_id must not be empty");
        }
        match (&config.issuer, &config.service) {
            (Some(_), Some(_)) => bail!("Set either `issuer` or a [service] table, not both"),
            (None, None) => bail!("Set `issuer` or a [service] table with the provider endpoints"),
            _ => {}
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// The explicit endpoints, if the config lists them.
    pub fn explicit_service(&self) -> Result<Option<ServiceConfig>> {
        let Some(section) = &self.service else {
            return Ok(None);
        };
        let mut service = ServiceConfig::new(
            section.authorization_endpoint.clone(),
            section.token_endpoint.clone(),
        )?;
        if let Some(revocation) = &section.revocation_endpoint {
            service = service.with_revocation_endpoint(revocation.clone())?;
        }
        Ok(Some(service))
    }

    /// Resolve the provider endpoints, running discovery against `issuer`
    /// when no [service] table is present.
    pub async fn client_config(&self, http: &reqwest::Client) -> Result<ClientConfig> {
        let service = match self.explicit_service()? {
            Some(service) => service,
            None => {
                let issuer = self
                    .issuer
                    .as_ref()
                    .context("No provider endpoints configured")?;
                appauth_login::discovery::discover(http, issuer)
                    .await
                    .with_context(|| format!("Discovery failed for {issuer}"))?
            }
        };
        Ok(ClientConfig::new(
            service,
            self.client_id.clone(),
            self.redirect_uri.clone(),
            self.scopes.iter().cloned(),
        ))
    }

    /// The credential store this config selects, rooted at `home`.
    pub fn credential_store(&self, home: &Path) -> CredentialStore {
        match self.credentials_store {
            CredentialsStoreKind::Keyring => CredentialStore::keyring_with_file_fallback(home),
            CredentialsStoreKind::File => {
                CredentialStore::new(Arc::new(EncryptedFileStore::new(home)))
            }
            CredentialsStoreKind::Memory => CredentialStore::memory(),
        }
    }
}

/// Locate the config file: `explicit`, else `$APPAUTH_CONFIG`, else
/// `config.toml` in the appauth home.
pub fn resolve_config_path(
    explicit: Option<PathBuf>,
    env_value: Option<OsString>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    match env_value {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => home.map(|home| home.join(CONFIG_FILE_NAME)),
    }
}

/// [`resolve_config_path`] against the process environment.
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    resolve_config_path(explicit, std::env::var_os(CONFIG_ENV_VAR), default_home())
        .context("Cannot determine the config file location; pass --config or set APPAUTH_CONFIG")
}
