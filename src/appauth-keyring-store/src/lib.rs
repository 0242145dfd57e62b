//! Key/value credential storage for appauth.
//!
//! The flow engine persists a single opaque string (the serialized auth
//! state) under a fixed key. This crate defines that boundary as the
//! [`KeyValueStore`] trait and provides two backends:
//! - [`KeyringStore`]: OS-native keychains (Windows Credential Manager,
//!   macOS Keychain, Linux Secret Service / keyutils)
//! - [`MemoryStore`]: process-local storage for tests and ephemeral hosts
//!
//! Every backend scopes its keys under a namespace (the keyring service
//! name, or the memory store's own map), so several applications can share
//! one OS keychain without colliding.

use std::sync::Arc;

use thiserror::Error;

mod keyring_store;
mod memory;

pub use keyring_store::KeyringStore;
pub use memory::MemoryStore;

/// Default namespace (keyring service name) for appauth entries.
pub const DEFAULT_SERVICE: &str = "appauth";

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to access the backing store.
    #[error("Failed to access credential store: {0}")]
    AccessDenied(String),

    /// Failed to store the value.
    #[error("Failed to store credential: {0}")]
    StoreFailed(String),

    /// Failed to delete the value.
    #[error("Failed to delete credential: {0}")]
    DeleteFailed(String),

    /// Value is larger than the backend can hold.
    #[error("Credential too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    /// Platform not supported.
    #[error("Keyring not supported on this platform")]
    NotSupported,

    /// Internal backend error.
    #[error("Credential store error: {0}")]
    Internal(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A string key/value store under a fixed logical namespace.
///
/// Implementations are blocking; async callers should move calls onto a
/// blocking thread.
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value under `key`. Returns whether anything was removed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Short backend name used in log output.
    fn backend_name(&self) -> &'static str;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}
