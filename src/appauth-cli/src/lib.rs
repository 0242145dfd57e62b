//! appauth CLI library.
//!
//! - `cli` - Command-line argument parsing and dispatch
//! - `config` - The TOML config file
//! - `commands` - Command implementations
//! - `styled_output` - Status messages on stderr

pub mod cli;
pub mod commands;
pub mod config;
pub mod styled_output;
