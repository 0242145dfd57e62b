//! appauth-login - OAuth 2.0 / OpenID Connect authorization code flow for
//! native clients.
//!
//! Provides the pieces of the flow:
//! - Authorization requests with PKCE (S256) and anti-forgery state
//! - One-shot redirect parsing bound to the pending attempt
//! - Code exchange, refresh and revocation against the provider
//! - A persisted auth state with refresh-token retention
//! - An owned [`AuthSession`] tying it all together
//!
//! Security features:
//! - OS keychain integration with an AES-256-GCM encrypted file fallback
//! - Secrets held in `secrecy` wrappers, never printed by `Debug`
//! - Constant-time state comparison
//! - File permissions enforcement (0600)

// Core modules
pub mod constants;
mod error;
mod secret;
mod utils;

// Flow building blocks
mod config;
pub mod discovery;
pub mod pkce;
mod redirect;
mod request;
mod state;
mod token;

// Persistence
pub mod storage;

// High-level APIs
mod revocation;
mod session;

pub use config::{ClientConfig, ServiceConfig};
pub use error::{
    AuthError, AuthorizationError, AuthorizationErrorCode, Result, TokenErrorCode,
};
pub use pkce::{CodeChallengeMethod, PkceParameters};
pub use redirect::{AuthorizationResponse, RedirectResponseParser};
pub use request::{
    AuthorizationRequest, AuthorizationRequestBuilder, PendingAuthorization,
    RedirectConsumptionMark,
};
pub use revocation::{RevocationFlow, RevocationOutcome, SignOutReport};
pub use secret::Token;
pub use session::AuthSession;
pub use state::{AuthException, AuthState, AuthStatus};
pub use storage::{CredentialStore, CredentialWriter, EncryptedFileStore, FallbackStore};
pub use token::{TokenExchangeClient, TokenResponse, TokenTypeHint};
pub use utils::safe_format_key;

// Storage boundary, re-exported for callers that pick a backend.
pub use appauth_keyring_store::{KeyValueStore, KeyringStore, MemoryStore, StoreError};
