//! Constants for the appauth-login crate.

/// Storage key the serialized auth state lives under.
pub const AUTH_STATE_KEY: &str = "auth_state";

/// The only response type this engine requests.
pub const RESPONSE_TYPE_CODE: &str = "code";

/// Scope that marks a request as OpenID Connect (adds a nonce).
pub const SCOPE_OPENID: &str = "openid";

/// Token type assumed when the provider omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Tokens expiring within this many seconds are refreshed proactively.
pub const EXPIRY_TOLERANCE_SECS: i64 = 60;

/// Random bytes drawn for each verifier, state and nonce (43 base64url chars).
pub const RANDOM_TOKEN_BYTES: usize = 32;

/// Well-known discovery document path.
pub const OPENID_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";

/// Directory name of the encrypted credential store under the user's home.
pub const APPAUTH_HOME_DIR: &str = ".appauth";

/// User-Agent string for HTTP requests
pub const USER_AGENT: &str = concat!("appauth/", env!("CARGO_PKG_VERSION"));

/// Overall timeout for requests to the provider, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;
