//! Styled status messages on stderr.
//!
//! Messages go to stderr so stdout stays clean for values meant to be
//! piped, such as `appauth token --show`. Colors are dropped when stderr is
//! not a terminal or `NO_COLOR` is set.

use std::io::{IsTerminal, Write};

const SUCCESS: &str = "\x1b[38;2;0;245;212m";
const ERROR: &str = "\x1b[38;2;255;107;107m";
const WARNING: &str = "\x1b[38;2;255;200;87m";
const INFO: &str = "\x1b[38;2;72;202;228m";
const DIM: &str = "\x1b[38;2;130;154;177m";
const RESET: &str = "\x1b[0m";

fn colors_disabled() -> bool {
    std::env::var("NO_COLOR")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Success,
    Error,
    Warning,
    Info,
    Dim,
}

impl MessageType {
    fn icon(&self) -> &'static str {
        match self {
            MessageType::Success => "[OK]",
            MessageType::Error => "[ERROR]",
            MessageType::Warning => "[WARN]",
            MessageType::Info => "[INFO]",
            MessageType::Dim => "-",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            MessageType::Success => SUCCESS,
            MessageType::Error => ERROR,
            MessageType::Warning => WARNING,
            MessageType::Info => INFO,
            MessageType::Dim => DIM,
        }
    }
}

/// Render a message, with ANSI colors when `colored`.
pub fn format_message(msg_type: MessageType, message: &str, colored: bool) -> String {
    if colored {
        format!("{}{} {}{}", msg_type.color(), msg_type.icon(), message, RESET)
    } else {
        format!("{} {}", msg_type.icon(), message)
    }
}

fn print_styled(msg_type: MessageType, message: &str) {
    let colored = !colors_disabled() && std::io::stderr().is_terminal();
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", format_message(msg_type, message, colored));
}

pub fn print_success(message: &str) {
    print_styled(MessageType::Success, message);
}

pub fn print_error(message: &str) {
    print_styled(MessageType::Error, message);
}

pub fn print_warning(message: &str) {
    print_styled(MessageType::Warning, message);
}

pub fn print_info(message: &str) {
    print_styled(MessageType::Info, message);
}

pub fn print_dim(message: &str) {
    print_styled(MessageType::Dim, message);
}
