//! Utility functions for the appauth-login crate.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::constants::RANDOM_TOKEN_BYTES;
use crate::error::{AuthError, Result};

/// Mask a token for safe display.
pub fn safe_format_key(key: &str) -> String {
    if key.len() <= 13 || !key.is_ascii() {
        return "***".to_string();
    }
    let prefix = &key[..8];
    let suffix = &key[key.len() - 5..];
    format!("{prefix}***{suffix}")
}

/// Draw [`RANDOM_TOKEN_BYTES`] from the OS entropy source, base64url-encoded
/// without padding (43 characters).
pub fn random_token() -> Result<String> {
    let mut bytes = [0u8; RANDOM_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Constant-time string comparison.
///
/// Comparison time does not depend on where the strings differ, only on
/// their length.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Set restrictive file permissions (0600 on Unix).
pub fn set_file_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_format_key_long() {
        let key = "ya29.a0AfH6SMBx1234567890";
        assert_eq!(safe_format_key(key), "ya29.a0A***67890");
    }

    #[test]
    fn test_safe_format_key_short() {
        assert_eq!(safe_format_key("short-token"), "***");
    }

    #[test]
    fn test_random_token_shape() {
        let token = random_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, random_token().unwrap());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("s1", "s1"));
        assert!(!constant_time_compare("s1", "s2"));
        assert!(!constant_time_compare("s1", "s12"));
        assert!(constant_time_compare("", ""));
    }
}
