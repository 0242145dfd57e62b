//! appauth CLI - Main entry point.
//!
//! Signs in to an OAuth 2.0 / OpenID Connect provider with the
//! authorization code flow and keeps the resulting tokens fresh:
//! - `login` - Authorize in a browser, paste the redirect back
//! - `status` - Show the stored authorization state
//! - `refresh` / `token` - Refresh and print access tokens
//! - `logout` - Clear local state and revoke tokens

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use appauth_cli::cli::{Cli, LogLevel, dispatch_command};

/// Environment variable overriding `--log-level`.
const LOG_LEVEL_ENV_VAR: &str = "APPAUTH_LOG_LEVEL";

fn init_logging(cli: &Cli) {
    let env_level = std::env::var(LOG_LEVEL_ENV_VAR).ok();
    let log_level = LogLevel::resolve(cli.trace, cli.verbose, env_level.as_deref(), cli.log_level);

    // RUST_LOG wins when set, so individual modules can be tuned.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    dispatch_command(cli).await
}
