//! Auth state persistence.
//!
//! [`CredentialStore`] keeps the serialized [`AuthState`] under a single key
//! of any [`KeyValueStore`]. Backends:
//! - [`KeyringStore`](appauth_keyring_store::KeyringStore) (OS keychain)
//! - [`EncryptedFileStore`] (AES-256-GCM files under the appauth home)
//! - [`FallbackStore`] (keyring first, encrypted file when unavailable)
//! - [`MemoryStore`](appauth_keyring_store::MemoryStore)

mod encrypted;
mod writer;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use appauth_keyring_store::{KeyValueStore, KeyringStore, MemoryStore, StoreError};
use tracing::{debug, info, warn};

pub use encrypted::EncryptedFileStore;
pub use writer::CredentialWriter;

use crate::constants::{APPAUTH_HOME_DIR, AUTH_STATE_KEY};
use crate::error::Result;
use crate::state::AuthState;

/// Directory for appauth's files: `$APPAUTH_HOME`, else `~/.appauth`.
pub fn default_home() -> Option<PathBuf> {
    match std::env::var_os("APPAUTH_HOME") {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => dirs::home_dir().map(|home| home.join(APPAUTH_HOME_DIR)),
    }
}

/// Persists one [`AuthState`] under a fixed key.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    /// Store state under [`AUTH_STATE_KEY`].
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(backend, AUTH_STATE_KEY)
    }

    pub fn with_key(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// A process-local store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The OS keychain, falling back to encrypted files under `home`.
    pub fn keyring_with_file_fallback(home: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FallbackStore::new(
            KeyringStore::new(),
            EncryptedFileStore::new(home),
        )))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted state.
    ///
    /// Returns `None` when nothing is stored, and also when the stored text
    /// cannot be read or parsed: a corrupt state is treated as a fresh start.
    pub fn load(&self) -> Option<AuthState> {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    backend = self.backend_name(),
                    error = %e,
                    "Discarding unreadable auth state"
                );
                None
            }
        }
    }

    /// Load the persisted state, reporting read and parse failures.
    pub fn try_load(&self) -> Result<Option<AuthState>> {
        let Some(text) = self.backend.get(&self.key)? else {
            debug!(backend = self.backend_name(), "No persisted auth state");
            return Ok(None);
        };
        let state = AuthState::json_deserialize(&text)?;
        debug!(backend = self.backend_name(), "Loaded persisted auth state");
        Ok(Some(state))
    }

    pub fn save(&self, state: &AuthState) -> Result<()> {
        self.save_serialized(&state.json_serialize_string()?)
    }

    pub(crate) fn save_serialized(&self, text: &str) -> Result<()> {
        self.backend.set(&self.key, text)?;
        debug!(backend = self.backend_name(), "Persisted auth state");
        Ok(())
    }

    /// Remove the persisted state. Succeeds when nothing was stored.
    pub fn clear(&self) -> Result<()> {
        if self.backend.remove(&self.key)? {
            debug!(backend = self.backend_name(), "Cleared persisted auth state");
        }
        Ok(())
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.backend_name())
            .field("key", &self.key)
            .finish()
    }
}

/// Two stores where the primary is preferred and the secondary takes over
/// whenever the primary fails.
///
/// A successful write removes any stale copy from the other store, so a
/// later read never resurrects old credentials.
pub struct FallbackStore {
    primary: Box<dyn KeyValueStore>,
    fallback: Box<dyn KeyValueStore>,
}

impl FallbackStore {
    pub fn new(primary: impl KeyValueStore + 'static, fallback: impl KeyValueStore + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

impl KeyValueStore for FallbackStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        match self.primary.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => {
                debug!(
                    backend = self.primary.backend_name(),
                    error = %e,
                    "Primary store read failed, trying fallback"
                );
            }
        }
        self.fallback.get(key)
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        match self.primary.set(key, value) {
            Ok(()) => {
                if let Err(e) = self.fallback.remove(key) {
                    debug!(error = %e, "Failed to clear fallback copy (may not exist)");
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    backend = self.primary.backend_name(),
                    error = %e,
                    "Primary store unavailable, using {}",
                    self.fallback.backend_name()
                );
                self.fallback.set(key, value)?;
                if let Err(e) = self.primary.remove(key) {
                    debug!(error = %e, "Failed to clear primary copy (may not exist)");
                }
                info!(
                    backend = self.fallback.backend_name(),
                    "Credentials saved to fallback store"
                );
                Ok(())
            }
        }
    }

    fn remove(&self, key: &str) -> std::result::Result<bool, StoreError> {
        let primary = self.primary.remove(key);
        let fallback = self.fallback.remove(key);
        match (primary, fallback) {
            (Ok(a), Ok(b)) => Ok(a || b),
            (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
                debug!(error = %e, "Failed to delete from one store (may not exist)");
                Ok(a)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    fn backend_name(&self) -> &'static str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::token::TokenResponse;

    /// A store whose every operation fails, like a locked keychain.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> std::result::Result<Option<String>, StoreError> {
            Err(StoreError::AccessDenied("locked".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::AccessDenied("locked".into()))
        }

        fn remove(&self, _key: &str) -> std::result::Result<bool, StoreError> {
            Err(StoreError::AccessDenied("locked".into()))
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    fn authorized_state() -> AuthState {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer("tok", None).with_refresh_token("r1")));
        state
    }

    #[test]
    fn test_save_load_clear() {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone());

        assert!(store.load().is_none());
        store.save(&authorized_state()).unwrap();
        assert!(backend.get(AUTH_STATE_KEY).unwrap().is_some());
        assert_eq!(store.load(), Some(authorized_state()));

        store.clear().unwrap();
        assert!(backend.is_empty());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_state_loads_as_none() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(AUTH_STATE_KEY, "{\"lastTokenResp").unwrap();
        let store = CredentialStore::new(backend);

        assert!(store.load().is_none());
        assert!(matches!(store.try_load(), Err(AuthError::Deserialization(_))));
    }

    #[test]
    fn test_backend_failure_reported_on_save() {
        let store = CredentialStore::new(Arc::new(BrokenStore));
        assert!(matches!(
            store.save(&authorized_state()),
            Err(AuthError::Storage(StoreError::AccessDenied(_)))
        ));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_fallback_used_when_primary_fails() {
        let fallback = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(BrokenStore, fallback.clone());

        store.set("k", "v").unwrap();
        assert_eq!(fallback.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.remove("k").unwrap());
        assert!(fallback.is_empty());
    }

    #[test]
    fn test_primary_write_clears_stale_fallback() {
        let primary = Arc::new(MemoryStore::new());
        let fallback = Arc::new(MemoryStore::new());
        fallback.set("k", "stale").unwrap();

        let store = FallbackStore::new(primary.clone(), fallback.clone());
        store.set("k", "fresh").unwrap();

        assert_eq!(primary.get("k").unwrap().as_deref(), Some("fresh"));
        assert!(fallback.is_empty());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_fallback_read_when_primary_empty() {
        let fallback = Arc::new(MemoryStore::new());
        fallback.set("k", "from-file").unwrap();
        let store = FallbackStore::new(MemoryStore::new(), fallback);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("from-file"));
    }
}
