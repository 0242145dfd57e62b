//! OS keychain backend.

use tracing::{debug, warn};

use crate::{DEFAULT_SERVICE, KeyValueStore, Result, StoreError};

/// Windows Credential Manager has a BLOB size limit of 2560 bytes.
/// We use a smaller chunk size to account for encoding overhead.
#[cfg(target_os = "windows")]
const WINDOWS_CREDENTIAL_CHUNK_SIZE: usize = 2400;

/// Maximum number of chunks we support (~24KB, enough for states carrying ID tokens).
#[cfg(target_os = "windows")]
const MAX_CREDENTIAL_CHUNKS: usize = 10;

#[cfg(target_os = "windows")]
const CHUNK_MARKER: &str = "__chunked__:";

impl From<keyring::Error> for StoreError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(_) => {
                StoreError::AccessDenied("Cannot access keyring storage".to_string())
            }
            keyring::Error::PlatformFailure(_) => {
                StoreError::Internal("Platform-specific keyring failure".to_string())
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

/// Keyring store for secure credential management.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Create a new keyring store with the default service name.
    pub fn new() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
        }
    }

    /// Create a new keyring store with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// The service name entries are stored under.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(StoreError::from)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value).map_err(|e| {
            warn!(key, error = %e, "Failed to store credential");
            StoreError::StoreFailed(e.to_string())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(StoreError::DeleteFailed(e.to_string())),
        }
    }

    #[cfg(target_os = "windows")]
    fn chunk_key(key: &str, index: usize) -> String {
        format!("{key}_chunk_{index}")
    }

    /// Windows-specific: delete all chunk entries for a key.
    #[cfg(target_os = "windows")]
    fn delete_chunks_from(&self, key: &str, first: usize) -> bool {
        let mut deleted = false;
        for i in first..MAX_CREDENTIAL_CHUNKS {
            match self.delete(&Self::chunk_key(key, i)) {
                Ok(removed) => deleted |= removed,
                Err(e) => debug!(key, chunk = i, error = %e, "Failed to delete chunk"),
            }
        }
        deleted
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "windows")]
impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(value) = self.read(key)? else {
            return Ok(None);
        };

        let Some(count) = value.strip_prefix(CHUNK_MARKER) else {
            debug!(key, "Retrieved credential");
            return Ok(Some(value));
        };

        let count: usize = count
            .parse()
            .map_err(|_| StoreError::Internal(format!("Invalid chunk count for {key}")))?;
        debug!(key, chunks = count, "Loading chunked credential");

        let mut full = String::new();
        for i in 0..count {
            let chunk = self.read(&Self::chunk_key(key, i))?.ok_or_else(|| {
                StoreError::Internal(format!("Missing chunk {i} of {key}"))
            })?;
            full.push_str(&chunk);
        }
        Ok(Some(full))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if value.len() <= WINDOWS_CREDENTIAL_CHUNK_SIZE {
            debug!(key, size = value.len(), "Storing credential directly");
            self.write(key, value)?;
            self.delete_chunks_from(key, 0);
            return Ok(());
        }

        // Split on char boundaries so every chunk stays valid UTF-8.
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < value.len() {
            let mut end = (start + WINDOWS_CREDENTIAL_CHUNK_SIZE).min(value.len());
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            chunks.push(&value[start..end]);
            start = end;
        }

        if chunks.len() > MAX_CREDENTIAL_CHUNKS {
            return Err(StoreError::TooLarge {
                size: value.len(),
                limit: WINDOWS_CREDENTIAL_CHUNK_SIZE * MAX_CREDENTIAL_CHUNKS,
            });
        }

        debug!(
            key,
            size = value.len(),
            chunks = chunks.len(),
            "Splitting large credential into chunks for Windows Credential Manager"
        );

        for (i, chunk) in chunks.iter().enumerate() {
            self.write(&Self::chunk_key(key, i), chunk)?;
        }
        self.write(key, &format!("{CHUNK_MARKER}{}", chunks.len()))?;
        self.delete_chunks_from(key, chunks.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut deleted = self.delete_chunks_from(key, 0);
        deleted |= self.delete(key)?;
        if deleted {
            debug!(key, "Deleted credential");
        }
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "keyring"
    }
}

#[cfg(not(target_os = "windows"))]
impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.read(key)?;
        if value.is_some() {
            debug!(key, "Retrieved credential");
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value)?;
        debug!(key, size = value.len(), "Stored credential");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let deleted = self.delete(key)?;
        if deleted {
            debug!(key, "Deleted credential");
        }
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "keyring"
    }
}
