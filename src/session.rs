//! Conversation session state.
//!
//! A [`Session`] carries the state that outlives a single send: the resume
//! identifier the agent reports on its first events, the set of tools allowed
//! to run without confirmation, and the configured system prompt.

use std::collections::HashSet;

/// Read-only tools allowed without confirmation on a fresh session.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "View",
    "Read",
    "Glob",
    "Grep",
    "LS",
    "GlobTool",
    "GrepTool",
    "ReadNotebook",
];

/// Permission status for a requested tool use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// The tool is on the allow-list and runs without confirmation.
    Approved,
    /// The tool is not allow-listed; the agent will report a denial the
    /// caller must act on.
    Pending,
    /// The agent reported a denial for this tool.
    Denied,
}

/// Conversational continuity state spanning one or more sends.
#[derive(Debug, Clone)]
pub struct Session {
    resume_id: Option<String>,
    allowed_tools: HashSet<String>,
    system_prompt: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with the default read-only allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resume_id: None,
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|s| (*s).to_string()).collect(),
            system_prompt: String::new(),
        }
    }

    /// The resume identifier, once the agent has reported one.
    #[must_use]
    pub fn resume_id(&self) -> Option<&str> {
        self.resume_id.as_deref()
    }

    /// Latch the session id from a protocol event. The first value wins;
    /// later ids are ignored because the agent repeats the id on every event.
    pub fn latch_resume_id(&mut self, id: &str) {
        if self.resume_id.is_none() {
            tracing::debug!(session_id = %id, "Session id latched");
            self.resume_id = Some(id.to_string());
        }
    }

    /// Whether a tool may run without confirmation.
    #[must_use]
    pub fn is_allowed(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }

    /// Decide the permission status for a requested tool.
    #[must_use]
    pub fn decide(&self, tool: &str) -> PermissionDecision {
        if self.is_allowed(tool) {
            PermissionDecision::Approved
        } else {
            PermissionDecision::Pending
        }
    }

    /// Add a tool to the allow-list.
    pub fn allow_tool(&mut self, tool: impl Into<String>) {
        self.allowed_tools.insert(tool.into());
    }

    /// Remove a tool from the allow-list.
    pub fn disallow_tool(&mut self, tool: &str) {
        self.allowed_tools.remove(tool);
    }

    /// Currently allowed tools, sorted for deterministic output.
    #[must_use]
    pub fn allowed_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.allowed_tools.iter().cloned().collect();
        tools.sort();
        tools
    }

    /// Comma-joined allow-list for `--allowedTools`, or `None` when empty.
    #[must_use]
    pub fn allowed_tools_arg(&self) -> Option<String> {
        if self.allowed_tools.is_empty() {
            None
        } else {
            Some(self.allowed_tools().join(","))
        }
    }

    /// Restore the allow-list to the default read-only set.
    pub fn reset_allowed_tools(&mut self) {
        self.allowed_tools = DEFAULT_ALLOWED_TOOLS.iter().map(|s| (*s).to_string()).collect();
    }

    /// The configured system prompt (may be empty).
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Replace the system prompt.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    /// Start a new conversation: drop the resume id and restore the default
    /// allow-list. The system prompt is configuration and survives.
    pub fn reset(&mut self) {
        self.resume_id = None;
        self.reset_allowed_tools();
    }

    /// Full teardown for process-wide shutdown.
    pub fn clear(&mut self) {
        self.resume_id = None;
        self.allowed_tools.clear();
    }
}
