//! Encrypted file-based credential storage.
//!
//! Uses AES-256-GCM with a machine-derived key. Each key lives in its own
//! `<key>.enc` file holding `nonce || ciphertext`. This is the fallback
//! when no OS keychain is available.

use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use appauth_keyring_store::{KeyValueStore, StoreError};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::utils::set_file_permissions;

const ENCRYPTED_FILE_EXTENSION: &str = "enc";
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Derive the encryption key from machine-specific entropy.
fn machine_derived_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();

    // Machine ID (Linux) or fallback
    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
            hasher.update(id.trim().as_bytes());
        } else if let Ok(id) = std::fs::read_to_string("/var/lib/dbus/machine-id") {
            hasher.update(id.trim().as_bytes());
        }
    }

    if let Ok(hostname) = hostname::get() {
        hasher.update(hostname.as_encoded_bytes());
    }

    // User ID (Unix) or username (Windows)
    #[cfg(unix)]
    {
        hasher.update(unsafe { libc::getuid() }.to_le_bytes());
    }
    #[cfg(windows)]
    {
        if let Ok(user) = std::env::var("USERNAME") {
            hasher.update(user.as_bytes());
        }
    }

    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }

    hasher.update(b"appauth-credential-encryption-v1-machine-key");

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&hasher.finalize());
    key
}

fn cipher() -> Result<Aes256Gcm, StoreError> {
    let key = machine_derived_key();
    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| StoreError::Internal(format!("cipher init failed: {e}")))
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> StoreError {
    let message = format!("{action} {}: {err}", path.display());
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => StoreError::AccessDenied(message),
        _ => StoreError::StoreFailed(message),
    }
}

/// AES-256-GCM encrypted files in a single directory.
#[derive(Debug, Clone)]
pub struct EncryptedFileStore {
    dir: PathBuf,
}

impl EncryptedFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9_-]` are replaced.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.{ENCRYPTED_FILE_EXTENSION}"))
    }
}

impl KeyValueStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let encrypted = std::fs::read(&path).map_err(|e| io_error("failed to read", &path, e))?;
        if encrypted.len() < NONCE_SIZE {
            return Err(StoreError::Internal(format!(
                "invalid encrypted file: {}",
                path.display()
            )));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let plaintext = cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| StoreError::Internal(format!("decryption failed: {e}")))?;

        let value = String::from_utf8(plaintext).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            StoreError::Internal("invalid UTF-8 in decrypted data".to_string())
        })?;

        debug!(path = %path.display(), "Loaded encrypted credential file");
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| io_error("failed to create directory", &self.dir, e))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| StoreError::Internal(format!("entropy source failure: {e}")))?;

        let ciphertext = cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), value.as_bytes())
            .map_err(|e| StoreError::Internal(format!("encryption failed: {e}")))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        // Write to a sibling file and rename so a crash never leaves a
        // half-written credential behind.
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{ENCRYPTED_FILE_EXTENSION}.tmp"));
        std::fs::write(&tmp, &output).map_err(|e| io_error("failed to write", &tmp, e))?;
        set_file_permissions(&tmp).map_err(|e| io_error("failed to restrict", &tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error("failed to replace", &path, e))?;

        debug!(path = %path.display(), "Saved encrypted credential file");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }

        // Overwrite with random data before deleting
        if let Ok(metadata) = std::fs::metadata(&path) {
            let mut random_data = vec![0u8; metadata.len() as usize];
            if OsRng.try_fill_bytes(&mut random_data).is_ok() {
                let _ = std::fs::write(&path, &random_data);
            }
        }

        std::fs::remove_file(&path).map_err(|e| {
            StoreError::DeleteFailed(format!("failed to delete {}: {e}", path.display()))
        })?;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "encrypted-file"
    }
}
