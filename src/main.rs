//! Claude Bridge - streaming chat bridge to the Claude Code CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_bridge::agent::{ContextType, ProcessSupervisor, SendRequest};
use claude_bridge::config::BridgeConfig;
use claude_bridge::dispatch::SendObserver;
use claude_bridge::display;
use claude_bridge::retry::RetryCoordinator;
use claude_bridge::session::PermissionDecision;

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Streaming chat bridge to the Claude Code CLI",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML config file (default: standard locations).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the Claude Code CLI is installed and report its version.
    Status,
    /// Send one message and stream the response.
    Chat {
        /// The message to send.
        message: String,
        /// Attach a file's contents as context.
        #[arg(long)]
        context_file: Option<PathBuf>,
        /// On permission denials, approve every denied tool and retry once.
        #[arg(long)]
        approve_all: bool,
    },
}

/// Observer that streams the conversation to the terminal.
struct ConsoleObserver;

impl SendObserver for ConsoleObserver {
    fn on_text(&mut self, chunk: &str) {
        display::print_chunk(chunk);
    }

    fn on_tool_status(&mut self, tool_name: &str, decision: PermissionDecision) {
        display::print_tool_status(tool_name, decision);
    }

    fn on_permission_denied(&mut self, denials: &[claude_bridge::agent::PermissionDenial]) {
        display::print_denials(denials);
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> BridgeConfig {
    let loaded = match path {
        Some(path) => BridgeConfig::load_from(path),
        None => BridgeConfig::load(),
    };
    match loaded {
        Ok(config) => config,
        Err(err) => {
            display::print_error(&format!("Config error: {err}"));
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Commands::Status => {
            let supervisor = ProcessSupervisor::new(config);
            let status = supervisor.check_availability().await;
            display::print_status(&status);
            if !matches!(status, claude_bridge::agent::AgentStatus::Ready { .. }) {
                std::process::exit(1);
            }
        }
        Commands::Chat {
            message,
            context_file,
            approve_all,
        } => {
            let mut request = SendRequest::new(message);
            if let Some(path) = context_file {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        let file_name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned());
                        request =
                            request.with_context(contents, ContextType::Document, file_name);
                    }
                    Err(err) => {
                        display::print_error(&format!(
                            "Failed to read {}: {err}",
                            path.display()
                        ));
                        std::process::exit(2);
                    }
                }
            }

            let mut supervisor = ProcessSupervisor::new(config);
            let mut coordinator = RetryCoordinator::new();
            let mut observer = ConsoleObserver;

            let mut outcome = coordinator
                .send(&mut supervisor, request, &mut observer)
                .await;

            if approve_all && !outcome.denials.is_empty() {
                if let Some(retried) = coordinator
                    .approve_all_and_retry(&mut supervisor, &mut observer)
                    .await
                {
                    outcome = retried;
                }
            }

            println!();
            if !outcome.success {
                display::print_error(outcome.error.as_deref().unwrap_or("Unknown error"));
                std::process::exit(1);
            }
        }
    }
}
