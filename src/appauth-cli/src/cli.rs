//! Command-line arguments and dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Pick the effective level: `--trace`, then `--verbose`, then the
    /// environment, then `--log-level`.
    pub fn resolve(trace: bool, verbose: bool, env_level: Option<&str>, flag: LogLevel) -> LogLevel {
        if trace {
            LogLevel::Trace
        } else if verbose {
            LogLevel::Debug
        } else {
            env_level.and_then(LogLevel::from_str_loose).unwrap_or(flag)
        }
    }

    /// Filter directive scoped to the appauth crates.
    pub fn directive(&self) -> String {
        let level = self.as_filter_str();
        format!("warn,appauth_cli={level},appauth_login={level},appauth_keyring_store={level}")
    }
}

/// appauth - sign in to an OAuth 2.0 / OpenID Connect provider.
#[derive(Parser, Debug)]
#[command(name = "appauth", version, about)]
pub struct Cli {
    /// Path to the config file (default: $APPAUTH_CONFIG, then ~/.appauth/config.toml)
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Enable trace-level logging for debugging
    #[arg(long = "trace", global = true)]
    pub trace: bool,

    /// Log level when neither --verbose nor --trace is given
    #[arg(long = "log-level", global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in through the provider's authorization page
    Login(LoginCommand),

    /// Show the current authorization state
    Status,

    /// Refresh the access token now
    Refresh,

    /// Print an access token, refreshing it first if needed
    Token(TokenCommand),

    /// Sign out and revoke the stored tokens
    Logout,
}

#[derive(Args, Debug, Default)]
pub struct LoginCommand {
    /// Hint the provider about the account to sign in with
    #[arg(long = "login-hint", value_name = "ACCOUNT")]
    pub login_hint: Option<String>,

    /// OIDC prompt value, e.g. "login" or "consent"
    #[arg(long = "prompt")]
    pub prompt: Option<String>,

    /// Override the configured scopes (repeatable)
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct TokenCommand {
    /// Print the full token instead of a masked form
    #[arg(long = "show")]
    pub show: bool,
}

/// Run the selected command.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let config = commands::load_config(cli.config)?;
    let home = commands::prepare_home(&config)?;
    match cli.command {
        // Local-only: these must work while the provider is unreachable.
        Commands::Status => commands::run_status(&config, &home).await,
        Commands::Logout => commands::run_logout(&config, &home).await,
        Commands::Login(args) => {
            let ctx = commands::CommandContext::open(config, &home).await?;
            commands::run_login(ctx, args).await
        }
        Commands::Refresh => {
            let ctx = commands::CommandContext::open(config, &home).await?;
            commands::run_refresh(ctx).await
        }
        Commands::Token(args) => {
            let ctx = commands::CommandContext::open(config, &home).await?;
            commands::run_token(ctx, args).await
        }
    }
}
