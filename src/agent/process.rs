//! Agent process spawning and control.
//!
//! This module provides a builder for the agent invocation's argument list,
//! derived deterministically from session state, along with a handle type for
//! the running child process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::agent::locate;
use crate::session::Session;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The agent binary was not found.
    #[error("Agent binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Builder for the agent's command-line arguments.
///
/// The prompt itself is never an argument; it is written to stdin after
/// spawning so arbitrary user text cannot collide with flag parsing.
#[derive(Debug, Clone, Default)]
pub struct AgentInvocation {
    system_prompt: Option<String>,
    resume_session: Option<String>,
    allowed_tools: Option<String>,
}

impl AgentInvocation {
    /// Create an invocation with only the fixed protocol flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the invocation from current session state: resume id if
    /// latched, comma-joined allow-list if non-empty, system prompt if set.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        let mut invocation = Self::new();
        if !session.system_prompt().is_empty() {
            invocation.system_prompt = Some(session.system_prompt().to_string());
        }
        if let Some(id) = session.resume_id() {
            invocation.resume_session = Some(id.to_string());
        }
        invocation.allowed_tools = session.allowed_tools_arg();
        invocation
    }

    /// Append to the agent's system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Set the comma-joined allow-list.
    #[must_use]
    pub fn allowed_tools(mut self, tools: impl Into<String>) -> Self {
        self.allowed_tools = Some(tools.into());
        self
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(prompt) = &self.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }

        if let Some(session_id) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        if let Some(tools) = &self.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tools.clone());
        }

        args
    }
}

/// Write the composed prompt to the agent's stdin and close it.
///
/// Nothing further is ever written; EOF signals the agent to start. The
/// handle is owned rather than borrowed from the process so a pending write
/// can be raced against cancellation and the send deadline.
///
/// # Errors
///
/// Returns an error if the write or shutdown fails.
pub async fn deliver_prompt(mut stdin: ChildStdin, prompt: String) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.shutdown().await
}

/// A running agent process.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
}

impl AgentProcess {
    /// Spawn the agent with the given invocation.
    ///
    /// Stdin, stdout and stderr are all piped; the widened search path and
    /// UTF-8 locale are applied. The child is killed if the handle is dropped
    /// while it is still running.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(binary: &Path, invocation: &AgentInvocation) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(binary);
        cmd.args(invocation.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        locate::apply_subprocess_env(&mut cmd);

        let child = cmd.spawn().map_err(SpawnError::from_io)?;
        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => self.child.kill().await,
            }
        } else {
            // Process already exited
            Ok(())
        }
    }
}
