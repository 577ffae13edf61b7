//! Colored terminal output for the bridge binary.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::agent::{AgentStatus, PermissionDenial};
use crate::session::PermissionDecision;

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{cut}...")
    }
}

/// Format a tool input object for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let value_str = match v {
                        serde_json::Value::String(s) => truncate(s, 50),
                        other => truncate(&other.to_string(), 50),
                    };
                    format!("{k}={value_str}")
                })
                .collect();
            pairs.join(", ")
        }
        other => truncate(&other.to_string(), DEFAULT_MAX_LEN),
    }
}

/// Print a streamed text chunk without waiting for a full line.
pub fn print_chunk(chunk: &str) {
    print!("{chunk}");
    let _ = io::stdout().flush();
}

/// Print a tool-use request with its permission status.
pub fn print_tool_status(tool_name: &str, decision: PermissionDecision) {
    let status = match decision {
        PermissionDecision::Approved => "approved".green().to_string(),
        PermissionDecision::Pending => "pending".yellow().to_string(),
        PermissionDecision::Denied => "denied".red().to_string(),
    };
    eprintln!("{} {} ({status})", "[TOOL]".blue().bold(), tool_name.cyan());
}

/// Print the denial records of a concluded send.
pub fn print_denials(denials: &[PermissionDenial]) {
    eprintln!(
        "{} {} tool(s) were refused for lack of permission:",
        "[DENIED]".red().bold(),
        denials.len()
    );
    for denial in denials {
        eprintln!(
            "  {} {}",
            denial.tool_name.cyan(),
            format_tool_input(&denial.tool_input).dimmed()
        );
    }
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.red());
}

/// Print the agent availability status.
pub fn print_status(status: &AgentStatus) {
    match status {
        AgentStatus::Ready { version } => {
            let version = version.as_deref().unwrap_or("unknown version");
            println!("{} claude {}", "[READY]".green().bold(), version.cyan());
        }
        AgentStatus::NotInstalled => {
            println!(
                "{} Claude Code CLI is not installed (see https://claude.ai/code)",
                "[MISSING]".red().bold()
            );
        }
        AgentStatus::Error { message } => {
            println!("{} {}", "[ERROR]".red().bold(), message.red());
        }
    }
}
