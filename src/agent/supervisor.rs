//! Process supervision for one send at a time.
//!
//! [`ProcessSupervisor`] owns the child process lifecycle: it builds the
//! invocation from session state, spawns the agent, delivers the prompt,
//! routes stdout through framing, parsing and dispatch, and resolves each
//! send exactly once through a three-way race between the terminal `result`
//! event, process exit, and a fixed deadline. Cancellation arrives through a
//! cloneable [`AbortHandle`] and always kills the child before resolving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::agent::events::PermissionDenial;
use crate::agent::framer::LineFramer;
use crate::agent::locate;
use crate::agent::process::{deliver_prompt, AgentInvocation, AgentProcess, SpawnError};
use crate::config::BridgeConfig;
use crate::dispatch::{Dispatcher, SendObserver, SendOutcome};
use crate::session::Session;

/// How long to wait for the child to exit on its own after the terminal
/// `result` event, before killing it.
const RESULT_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period between SIGTERM and SIGKILL when tearing down a live child.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Size of the stdout read buffer.
const READ_BUF_SIZE: usize = 8192;

/// Agent availability, as reported by the version probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    /// The agent responded to `--version`.
    Ready {
        /// Extracted version number, when it could be parsed.
        version: Option<String>,
    },
    /// The agent binary was not found on the widened search path.
    NotInstalled,
    /// The probe failed for another reason (non-zero exit, timeout, spawn
    /// error).
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// Kind of context attached to a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextType {
    /// No context; the message is sent as-is.
    #[default]
    None,
    /// The context is a whole document.
    Document,
    /// The context is a text selection.
    Selection,
}

/// One request/response cycle's input.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// The user's message.
    pub message: String,
    /// Context text prepended to the message, when attached.
    pub context: Option<String>,
    /// What kind of context is attached.
    pub context_type: ContextType,
    /// Name of the file the context came from, for labelling.
    pub file_name: Option<String>,
}

impl SendRequest {
    /// A plain request with no attached context.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            context_type: ContextType::None,
            file_name: None,
        }
    }

    /// Attach context to the request.
    #[must_use]
    pub fn with_context(
        mut self,
        context: impl Into<String>,
        context_type: ContextType,
        file_name: Option<String>,
    ) -> Self {
        self.context = Some(context.into());
        self.context_type = context_type;
        self.file_name = file_name;
        self
    }

    /// Compose the single prompt string written to the agent's stdin.
    #[must_use]
    pub fn compose_prompt(&self) -> String {
        match (&self.context, self.context_type) {
            (Some(context), ContextType::Document | ContextType::Selection) => {
                let label = self
                    .file_name
                    .as_ref()
                    .map_or_else(|| "Context".to_string(), |f| format!("Document: {f}"));
                format!(
                    "{label}\n\n{context}\n\n---\n\nUser Question: {}",
                    self.message
                )
            }
            _ => self.message.clone(),
        }
    }
}

/// Cloneable handle that cancels the send currently in flight.
///
/// Safe to call at any time; cancelling with no send in flight is a no-op
/// because each send installs a fresh token at entry.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    /// Cancel the in-flight send, if any.
    pub fn abort(&self) {
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }
}

/// Clears the busy flag when a send resolves, even if its future is dropped.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the agent child process and resolves one send at a time.
pub struct ProcessSupervisor {
    config: BridgeConfig,
    session: Session,
    dispatcher: Dispatcher,
    framer: LineFramer,
    current_cancel: Arc<Mutex<CancellationToken>>,
    in_flight: Arc<AtomicBool>,
}

impl ProcessSupervisor {
    /// Create a supervisor with a fresh session seeded from the config.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let mut session = Session::new();
        session.set_system_prompt(config.system_prompt.clone());
        Self {
            config,
            session,
            dispatcher: Dispatcher::new(),
            framer: LineFramer::new(),
            current_cancel: Arc::new(Mutex::new(CancellationToken::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The current session state.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The latched session id, if the agent has reported one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.resume_id()
    }

    /// Add a tool to the session allow-list.
    pub fn allow_tool(&mut self, tool: impl Into<String>) {
        self.session.allow_tool(tool);
    }

    /// Remove a tool from the session allow-list.
    pub fn disallow_tool(&mut self, tool: &str) {
        self.session.disallow_tool(tool);
    }

    /// Replace the system prompt used for subsequent sends.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.session.set_system_prompt(prompt);
    }

    /// Replace the agent binary name or path used for subsequent sends.
    pub fn set_agent_path(&mut self, path: impl Into<String>) {
        self.config.agent_path = path.into();
    }

    /// Denial records from the most recent send.
    #[must_use]
    pub fn last_permission_denials(&self) -> &[PermissionDenial] {
        self.dispatcher.denials()
    }

    /// Whether a send is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// A handle that cancels the in-flight send from elsewhere.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            current: Arc::clone(&self.current_cancel),
        }
    }

    /// Start a new conversation: cancel anything live, drop the resume id
    /// and restore the default allow-list.
    pub fn reset_session(&mut self) {
        self.abort_handle().abort();
        self.session.reset();
    }

    /// Process-wide teardown: cancel anything live and clear the session.
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down agent bridge");
        self.abort_handle().abort();
        self.session.clear();
        self.dispatcher.reset();
        self.framer.reset();
    }

    /// Probe the agent binary with `--version`.
    ///
    /// Distinguishes a missing binary from other failures so the caller can
    /// render actionable guidance. The probe is killed after its fixed
    /// deadline.
    pub async fn check_availability(&self) -> AgentStatus {
        let binary = locate::find_binary(&self.config.agent_path);
        let mut cmd = Command::new(&binary);
        cmd.arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        locate::apply_subprocess_env(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return AgentStatus::NotInstalled;
            }
            Err(err) => {
                return AgentStatus::Error {
                    message: err.to_string(),
                };
            }
        };

        // Dropping the output future on timeout kills the probe.
        let output = match tokio::time::timeout(
            self.config.version_check_timeout(),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return AgentStatus::Error {
                    message: err.to_string(),
                };
            }
            Err(_) => {
                tracing::warn!("Version probe timed out");
                return AgentStatus::Error {
                    message: "Timeout".to_string(),
                };
            }
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = Regex::new(r"[0-9][0-9.]*")
                .ok()
                .and_then(|re| re.find(&stdout).map(|m| m.as_str().to_string()));
            tracing::info!(version = ?version, "Agent is available");
            AgentStatus::Ready { version }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            AgentStatus::Error {
                message: if stderr.is_empty() {
                    "Unknown error".to_string()
                } else {
                    stderr
                },
            }
        }
    }

    /// Send one message and stream the response through the observer.
    ///
    /// Resolves exactly once: on the terminal `result` event, on process
    /// exit, on the fixed deadline, or on cancellation via the abort handle.
    /// No observer callback fires after resolution. Every failure mode folds
    /// into the returned [`SendOutcome`]; nothing is thrown past this
    /// boundary.
    pub async fn send(
        &mut self,
        request: &SendRequest,
        observer: &mut dyn SendObserver,
    ) -> SendOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("Send rejected: another send is already in flight");
            return SendOutcome::failure("A send is already in flight", "");
        }
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));
        self.run_send(request, observer).await
    }

    async fn run_send(
        &mut self,
        request: &SendRequest,
        observer: &mut dyn SendObserver,
    ) -> SendOutcome {
        self.dispatcher.reset();
        self.framer.reset();

        // Fresh cancellation scope per send; stale aborts cancel nothing.
        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.current_cancel.lock() {
            *slot = cancel.clone();
        }

        let binary = locate::find_binary(&self.config.agent_path);
        let invocation = AgentInvocation::from_session(&self.session);
        let prompt = request.compose_prompt();

        let mut process = match AgentProcess::spawn(&binary, &invocation) {
            Ok(process) => process,
            Err(SpawnError::NotFound) => {
                return SendOutcome::failure("Agent binary not found", "");
            }
            Err(err) => {
                return SendOutcome::failure(err.to_string(), "");
            }
        };
        tracing::info!(binary = %binary.display(), pid = ?process.id(), "Agent spawned");

        let Some(stdin) = process.take_stdin() else {
            let _ = process.kill().await;
            return SendOutcome::failure("Agent stdin not available", "");
        };
        let Some(mut stdout) = process.take_stdout() else {
            let _ = process.kill().await;
            return SendOutcome::failure("Agent stdout not available", "");
        };

        // Stderr never affects the outcome; it only feeds diagnostics.
        if let Some(stderr) = process.take_stderr() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(stderr = %line, "Agent diagnostic");
                }
            });
        }

        let deadline = tokio::time::sleep(self.config.message_timeout());
        tokio::pin!(deadline);
        let mut buf = vec![0u8; READ_BUF_SIZE];

        // Prompt delivery runs concurrently with reading, inside the same
        // race: a child that never drains stdin (or floods stdout before
        // reading it) stays subject to the deadline and the abort handle.
        let mut delivery = tokio::spawn(deliver_prompt(stdin, prompt));
        let mut delivering = true;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Send cancelled");
                    let _ = process.graceful_terminate(TERMINATE_GRACE).await;
                    return SendOutcome::failure(
                        "Request was cancelled",
                        self.dispatcher.accumulated_text(),
                    );
                }
                () = &mut deadline => {
                    tracing::warn!("Send deadline elapsed, terminating agent");
                    let _ = process.graceful_terminate(TERMINATE_GRACE).await;
                    return SendOutcome::failure(
                        format!(
                            "Request timed out after {} seconds",
                            self.config.message_timeout_secs
                        ),
                        self.dispatcher.accumulated_text(),
                    );
                }
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in self.framer.push(&buf[..n]) {
                            let resolved = self.dispatcher.handle_line(
                                &line,
                                &mut self.session,
                                observer,
                            );
                            if let Some(outcome) = resolved {
                                Self::reap_after_result(&mut process).await;
                                return outcome;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = process.kill().await;
                        return SendOutcome::failure(
                            format!("Failed to read agent output: {err}"),
                            self.dispatcher.accumulated_text(),
                        );
                    }
                },
                result = &mut delivery, if delivering => {
                    delivering = false;
                    if let Err(err) = result.map_err(std::io::Error::other).and_then(|r| r) {
                        let _ = process.kill().await;
                        return SendOutcome::failure(
                            format!("Failed to deliver prompt: {err}"),
                            self.dispatcher.accumulated_text(),
                        );
                    }
                }
            }
        }

        // EOF: a final record may lack its newline.
        if let Some(tail) = self.framer.flush() {
            let resolved = self
                .dispatcher
                .handle_line(&tail, &mut self.session, observer);
            if let Some(outcome) = resolved {
                Self::reap_after_result(&mut process).await;
                return outcome;
            }
        }

        // Stdout closed without a terminal event; reconcile on exit status.
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                let _ = process.graceful_terminate(TERMINATE_GRACE).await;
                SendOutcome::failure(
                    "Request was cancelled",
                    self.dispatcher.accumulated_text(),
                )
            }
            () = &mut deadline => {
                let _ = process.graceful_terminate(TERMINATE_GRACE).await;
                SendOutcome::failure(
                    format!(
                        "Request timed out after {} seconds",
                        self.config.message_timeout_secs
                    ),
                    self.dispatcher.accumulated_text(),
                )
            }
            status = process.wait() => self.reconcile_exit(status),
        }
    }

    /// Resolve a send that ended by process exit instead of a `result` event.
    ///
    /// Any accumulated text is favored over the exit code so partial progress
    /// is shown rather than discarded; exit 0 with no output is an empty
    /// success.
    fn reconcile_exit(&self, status: std::io::Result<std::process::ExitStatus>) -> SendOutcome {
        let text = self.dispatcher.accumulated_text();
        match status {
            Ok(status) => {
                tracing::info!(code = ?status.code(), "Agent exited without result event");
                if !text.is_empty() || status.success() {
                    SendOutcome::success(text)
                } else {
                    let code = status
                        .code()
                        .map_or_else(|| "unknown".to_string(), |c| c.to_string());
                    SendOutcome::failure(format!("Process exited with code {code}"), "")
                }
            }
            Err(err) => SendOutcome::failure(
                format!("Failed to wait for agent exit: {err}"),
                text,
            ),
        }
    }

    /// After a terminal event, give the child a moment to exit, then kill it
    /// so no orphan outlives the resolved send.
    async fn reap_after_result(process: &mut AgentProcess) {
        if tokio::time::timeout(RESULT_REAP_TIMEOUT, process.wait())
            .await
            .is_err()
        {
            tracing::warn!("Agent still running after result event, killing");
            let _ = process.kill().await;
        }
    }
}
