//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! This implements RFC 7636 for enhanced security in OAuth 2.0 flows.
//!
//! SECURITY: only S256 challenges are ever generated. `Plain` exists so a
//! declared method can be represented, but the request builder refuses it.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};
use crate::utils::random_token;

/// Minimum verifier length allowed by RFC 7636.
const MIN_VERIFIER_LEN: usize = 43;

/// Maximum verifier length allowed by RFC 7636.
const MAX_VERIFIER_LEN: usize = 128;

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// Challenge equals the verifier. Never generated.
    Plain,
    /// SHA-256 hash, base64url encoded.
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PKCE code verifier and challenge pair for a single authorization attempt.
///
/// The verifier stays client-side until token exchange; only the challenge
/// is sent with the authorization request.
#[derive(Clone)]
pub struct PkceParameters {
    verifier: String,
    challenge: String,
    method: CodeChallengeMethod,
}

impl PkceParameters {
    /// Generate a new S256 pair from 32 bytes of OS entropy.
    ///
    /// # Errors
    /// Fails only if the OS entropy source is unavailable.
    pub fn generate() -> Result<Self> {
        let verifier = random_token()?;
        let challenge = compute_s256_challenge(&verifier);

        Ok(Self {
            verifier,
            challenge,
            method: CodeChallengeMethod::S256,
        })
    }

    /// Create an S256 pair from an existing verifier.
    ///
    /// # Errors
    /// Returns `InvalidConfig` unless the verifier is 43-128 characters of
    /// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`.
    pub fn from_verifier(verifier: impl Into<String>) -> Result<Self> {
        let verifier = verifier.into();
        validate_verifier(&verifier)?;
        let challenge = compute_s256_challenge(&verifier);

        Ok(Self {
            verifier,
            challenge,
            method: CodeChallengeMethod::S256,
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> CodeChallengeMethod {
        self.method
    }
}

impl fmt::Debug for PkceParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceParameters")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

fn validate_verifier(verifier: &str) -> Result<()> {
    let len = verifier.len();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(AuthError::InvalidConfig(format!(
            "code verifier must be {MIN_VERIFIER_LEN}-{MAX_VERIFIER_LEN} characters, got {len}"
        )));
    }
    if let Some(c) = verifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')))
    {
        return Err(AuthError::InvalidConfig(format!(
            "invalid character in code verifier: {c:?}"
        )));
    }
    Ok(())
}

/// Compute the S256 code challenge from a verifier.
///
/// S256: BASE64URL(SHA256(ASCII(code_verifier)))
fn compute_s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceParameters::generate().unwrap();

        // 32 bytes base64url encoded
        assert_eq!(pkce.verifier().len(), 43);
        // SHA-256 digest base64url encoded
        assert_eq!(pkce.challenge().len(), 43);
        assert_ne!(pkce.verifier(), pkce.challenge());
        assert_eq!(pkce.method(), CodeChallengeMethod::S256);
    }

    #[test]
    fn test_rfc7636_test_vector() {
        let pkce =
            PkceParameters::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        assert_eq!(pkce.challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_from_verifier_rejects_short_and_bad_chars() {
        assert!(PkceParameters::from_verifier("too-short").is_err());
        let bad = format!("{}!", "a".repeat(50));
        assert!(PkceParameters::from_verifier(bad).is_err());
        assert!(PkceParameters::from_verifier("a".repeat(129)).is_err());
    }

    #[test]
    fn test_verifiers_unique_and_url_safe() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let pkce = PkceParameters::generate().unwrap();
            for c in pkce.verifier().chars() {
                assert!(
                    c.is_ascii_alphanumeric() || c == '-' || c == '_',
                    "Invalid character in verifier: {c}"
                );
            }
            assert!(seen.insert(pkce.verifier().to_string()));
        }
    }

    #[test]
    fn test_debug_hides_verifier() {
        let pkce = PkceParameters::generate().unwrap();
        let debug = format!("{pkce:?}");
        assert!(!debug.contains(pkce.verifier()));
    }
}
