//! Command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use appauth_login::storage::default_home;
use appauth_login::{
    AuthError, AuthSession, AuthState, AuthStatus, AuthorizationRequestBuilder, CredentialStore,
    RevocationFlow, RevocationOutcome, SignOutReport, Token, TokenExchangeClient, safe_format_key,
};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::{LoginCommand, TokenCommand};
use crate::config::{AppConfig, CredentialsStoreKind, config_path};
use crate::styled_output::{print_dim, print_error, print_info, print_success, print_warning};

/// Load the config selected by `explicit_config` or the environment.
pub fn load_config(explicit_config: Option<PathBuf>) -> Result<AppConfig> {
    let path = config_path(explicit_config)?;
    AppConfig::load(&path)
}

/// The appauth home directory, created when `config` persists credentials.
pub fn prepare_home(config: &AppConfig) -> Result<PathBuf> {
    let home = default_home().context("Cannot determine the appauth home directory")?;
    if config.credentials_store != CredentialsStoreKind::Memory {
        std::fs::create_dir_all(&home).with_context(|| {
            format!("Failed to create appauth home directory at {}", home.display())
        })?;
    }
    Ok(home)
}

/// Everything a provider-facing command needs: the loaded config and an
/// open session.
pub struct CommandContext {
    pub config: AppConfig,
    pub session: AuthSession,
}

impl CommandContext {
    /// Resolve the provider endpoints and open a session on the configured store.
    pub async fn open(config: AppConfig, home: &Path) -> Result<Self> {
        let tokens = TokenExchangeClient::new().context("Failed to build HTTP client")?;
        let client = config.client_config(tokens.http()).await?;
        let store = config.credential_store(home);
        let session = AuthSession::open(client, store, tokens).await;
        Ok(Self { config, session })
    }

    /// Wait for queued credential writes.
    async fn persist(&self) -> Result<()> {
        self.session
            .flush()
            .await
            .context("Failed to persist credentials")
    }
}

/// Read the persisted state without contacting the provider.
async fn load_state(store: CredentialStore) -> AuthState {
    match tokio::task::spawn_blocking(move || store.load()).await {
        Ok(state) => state.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "Failed to load auth state");
            AuthState::default()
        }
    }
}

/// A token cancelled on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            trigger.cancel();
        }
    });
    cancel
}

async fn read_redirect(cancel: &CancellationToken) -> Result<String> {
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = cancel.cancelled() => bail!("Login cancelled"),
        read = stdin.read_line(&mut line) => {
            read.context("Failed to read the redirect URL")?;
        }
    }
    let redirect = line.trim();
    if redirect.is_empty() {
        bail!("No redirect URL entered");
    }
    Ok(redirect.to_string())
}

/// Attach a hint for errors the user recovers from by signing in again.
fn with_hint(error: AuthError) -> anyhow::Error {
    if error.requires_reauthorization() {
        anyhow::Error::new(error).context("Run `appauth login` to sign in again")
    } else {
        anyhow::Error::new(error)
    }
}

pub async fn run_login(ctx: CommandContext, args: LoginCommand) -> Result<()> {
    let client = ctx.session.client();
    let mut builder = if args.scopes.is_empty() {
        AuthorizationRequestBuilder::from_client(client)
    } else {
        AuthorizationRequestBuilder::new(
            client.service.clone(),
            client.client_id.clone(),
            client.redirect_uri.clone(),
        )
        .scopes(args.scopes)
    };
    if let Some(hint) = args.login_hint {
        builder = builder.login_hint(hint);
    }
    if let Some(prompt) = args.prompt {
        builder = builder.prompt(prompt);
    }
    let pending = ctx.session.begin_authorization_with(builder)?;

    print_info("Open this URL in a browser and approve access:");
    println!("{}", pending.authorization_uri());
    print_info("Then paste the URL you were redirected to:");

    let cancel = cancel_on_ctrl_c();
    let redirect = match read_redirect(&cancel).await {
        Ok(redirect) => redirect,
        Err(e) => {
            pending.abandon();
            return Err(e);
        }
    };

    match ctx
        .session
        .complete_authorization(&pending, &redirect, &cancel)
        .await
    {
        Ok(status) => {
            ctx.persist().await?;
            print_success(&format!("Signed in ({status})."));
            print_dim(&format!(
                "Credentials stored in {} storage.",
                ctx.session.store_backend()
            ));
            Ok(())
        }
        Err(AuthError::Authorization(failure)) => {
            ctx.persist().await?;
            bail!("The provider refused authorization: {failure}")
        }
        Err(e) if e.is_informational() => {
            print_warning(&e.to_string());
            Ok(())
        }
        Err(e) => {
            ctx.persist().await?;
            Err(with_hint(e))
        }
    }
}

/// Human-readable lines describing `state`.
pub fn describe_state(state: &AuthState, backend: &str) -> Vec<String> {
    let now = Utc::now();
    let mut lines = vec![format!("Storage: {backend}")];

    if let Some(token) = state.access_token() {
        lines.push(format!("Access token: {}", safe_format_key(token.expose())));
    }
    match state.access_token_expiration() {
        Some(expires_at) if expires_at > now => {
            let minutes = expires_at.signed_duration_since(now).num_minutes();
            lines.push(format!("Expires: {} (in {minutes} min)", expires_at.to_rfc3339()));
        }
        Some(expires_at) => lines.push(format!("Expired: {}", expires_at.to_rfc3339())),
        None if state.access_token().is_some() => lines.push("Expires: never".to_string()),
        None => {}
    }
    lines.push(format!(
        "Refresh token: {}",
        if state.refresh_token().is_some() { "present" } else { "none" }
    ));
    if let Some(scope) = state.scope() {
        lines.push(format!("Scope: {scope}"));
    }
    if let Some(exception) = state.last_exception() {
        lines.push(format!("Last error: {exception}"));
    }
    lines
}

pub async fn run_status(config: &AppConfig, home: &Path) -> Result<()> {
    let store = config.credential_store(home);
    let backend = store.backend_name();
    let state = load_state(store).await;
    match state.status() {
        AuthStatus::Authorized => print_success("Authorized"),
        AuthStatus::ExpiredRefreshable => print_warning("Access token expired; it will be refreshed on next use"),
        AuthStatus::PendingExchange => print_warning("Authorization received but no tokens yet"),
        AuthStatus::Error => print_error("Authorization failed; sign in again with `appauth login`"),
        AuthStatus::Unauthenticated => {
            print_info("Not signed in");
            return Ok(());
        }
    }
    for line in describe_state(&state, backend) {
        print_dim(&line);
    }
    Ok(())
}

pub async fn run_refresh(ctx: CommandContext) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let result = ctx.session.refresh(&cancel).await;
    ctx.persist().await?;
    match result {
        Ok(status) => {
            print_success(&format!("Token refreshed ({status})."));
            Ok(())
        }
        Err(e) => Err(with_hint(e)),
    }
}

pub async fn run_token(ctx: CommandContext, args: TokenCommand) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let result = ctx.session.fresh_access_token(&cancel).await;
    ctx.persist().await?;
    let token = result.map_err(with_hint)?;
    if args.show {
        println!("{}", token.expose());
    } else {
        println!("{}", safe_format_key(token.expose()));
    }
    Ok(())
}

/// Summary lines for a sign-out.
pub fn describe_sign_out(report: &SignOutReport) -> Vec<String> {
    let mut lines = vec![
        format!("Refresh token: {}", report.refresh_token),
        format!("Access token: {}", report.access_token),
    ];
    if let Some(error) = &report.storage_error {
        lines.push(format!("Stored credentials could not be removed: {error}"));
    }
    lines
}

/// Remove the stored credentials, then revoke them if the provider can be
/// reached. Only the local removal is required to succeed.
pub async fn sign_out(config: &AppConfig, home: &Path) -> SignOutReport {
    let store = config.credential_store(home);
    let state = load_state(store.clone()).await;
    let refresh_token = state.refresh_token().cloned();
    let access_token = state.access_token().cloned();

    let storage_error = match tokio::task::spawn_blocking(move || store.clear()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("spawn_blocking failed: {e}")),
    };
    if let Some(error) = &storage_error {
        warn!(error = %error, "Failed to clear persisted auth state");
    }

    let (refresh_token, access_token) = if refresh_token.is_none() && access_token.is_none() {
        (RevocationOutcome::NoToken, RevocationOutcome::NoToken)
    } else {
        revoke_best_effort(config, refresh_token, access_token).await
    };
    SignOutReport {
        refresh_token,
        access_token,
        storage_error,
    }
}

async fn revoke_best_effort(
    config: &AppConfig,
    refresh_token: Option<Token>,
    access_token: Option<Token>,
) -> (RevocationOutcome, RevocationOutcome) {
    let provider = match TokenExchangeClient::new().context("Failed to build HTTP client") {
        Ok(tokens) => config
            .client_config(tokens.http())
            .await
            .map(|client| (tokens, client)),
        Err(e) => Err(e),
    };
    match provider {
        Ok((tokens, client)) => {
            RevocationFlow::new(tokens, client.service, client.client_id)
                .revoke_tokens(refresh_token, access_token)
                .await
        }
        Err(e) => {
            let reason = format!("{e:#}");
            warn!(error = %reason, "Provider unreachable, tokens discarded locally only");
            let unreachable = |token: &Option<Token>| match token {
                Some(_) => RevocationOutcome::Failed(reason.clone()),
                None => RevocationOutcome::NoToken,
            };
            (unreachable(&refresh_token), unreachable(&access_token))
        }
    }
}

pub async fn run_logout(config: &AppConfig, home: &Path) -> Result<()> {
    let report = sign_out(config, home).await;
    let was_signed_in = report.refresh_token != RevocationOutcome::NoToken
        || report.access_token != RevocationOutcome::NoToken;

    if report.is_complete() {
        if was_signed_in {
            print_success("Signed out.");
        } else {
            print_info("Not signed in.");
        }
    } else {
        print_warning("Signed out locally, but not every step succeeded.");
    }
    for line in describe_sign_out(&report) {
        print_dim(&line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use appauth_login::TokenResponse;
    use chrono::Duration;

    #[test]
    fn test_describe_unauthenticated() {
        let lines = describe_state(&AuthState::new(), "memory");
        assert_eq!(lines, vec!["Storage: memory", "Refresh token: none"]);
    }

    #[test]
    fn test_describe_authorized_masks_token() {
        let mut state = AuthState::new();
        state.update(Ok(TokenResponse::bearer(
            "abcdefgh-secret-part-12345",
            Some(Utc::now() + Duration::hours(1)),
        )
        .with_refresh_token("refresh")
        .with_scope("openid email")));

        let lines = describe_state(&state, "keyring");
        assert!(lines.contains(&"Access token: abcdefgh***12345".to_string()));
        assert!(lines.contains(&"Refresh token: present".to_string()));
        assert!(lines.contains(&"Scope: openid email".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("Expires: ")));
        assert!(lines.iter().all(|l| !l.contains("secret-part")));
    }

    #[test]
    fn test_describe_sign_out() {
        let report = SignOutReport {
            refresh_token: RevocationOutcome::Revoked,
            access_token: RevocationOutcome::Failed("HTTP 503".into()),
            storage_error: None,
        };
        assert_eq!(
            describe_sign_out(&report),
            vec!["Refresh token: revoked", "Access token: failed: HTTP 503"]
        );
    }
}
