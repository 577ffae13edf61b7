//! Ordered event dispatch for one send.
//!
//! The dispatcher consumes parsed events strictly in arrival order, latches
//! the session id, deduplicates repeated wire records, aggregates assistant
//! text, and drives the caller's observer callbacks. All of its per-send
//! state lives in a [`ResponseAccumulator`] that is cleared at send entry.
//!
//! Duplicate lines are a property of the wire format (the agent re-emits
//! records when resuming), not a condition to surface to the caller: a
//! message `uuid` seen twice is dropped before any kind-specific handling,
//! and exact text blocks and tool-use ids are each delivered at most once.

use std::collections::HashSet;

use crate::agent::{parse_line, ContentBlock, PermissionDenial, ProtocolEvent};
use crate::session::{PermissionDecision, Session};

/// Caller-supplied callbacks invoked while a send is streaming.
///
/// All methods default to no-ops so implementors can pick the ones they need.
pub trait SendObserver {
    /// A chunk of assistant text, in display order. Paragraph breaks between
    /// assistant turns arrive as their own `"\n\n"` chunk.
    fn on_text(&mut self, chunk: &str) {
        let _ = chunk;
    }

    /// A tool-use request was observed, with its permission status.
    fn on_tool_status(&mut self, tool_name: &str, decision: PermissionDecision) {
        let _ = (tool_name, decision);
    }

    /// The terminal result reported tools refused for lack of permission.
    fn on_permission_denied(&mut self, denials: &[PermissionDenial]) {
        let _ = denials;
    }
}

/// Observer that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SendObserver for NullObserver {}

/// Uniform terminal outcome of one send.
///
/// Failures keep whatever text was accumulated before the failure, so a
/// caller can render partial progress next to the error.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// Whether the send concluded successfully.
    pub success: bool,
    /// Accumulated assistant text (possibly empty, kept on failure too).
    pub content: String,
    /// Error message when the send failed.
    pub error: Option<String>,
    /// Denial records carried by the terminal event.
    pub denials: Vec<PermissionDenial>,
}

impl SendOutcome {
    /// A successful outcome with the given content.
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            denials: Vec::new(),
        }
    }

    /// A failed outcome with an error message and any partial content.
    #[must_use]
    pub fn failure(error: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            error: Some(error.into()),
            denials: Vec::new(),
        }
    }
}

/// Event kinds tracked for paragraph-break decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    System,
    Assistant,
    User,
    Result,
}

/// Per-send aggregation and deduplication state.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    seen_texts: HashSet<String>,
    seen_tool_ids: HashSet<String>,
    seen_uuids: HashSet<String>,
    last_kind: Option<EventKind>,
    denials: Vec<PermissionDenial>,
}

impl ResponseAccumulator {
    fn clear(&mut self) {
        self.text.clear();
        self.seen_texts.clear();
        self.seen_tool_ids.clear();
        self.seen_uuids.clear();
        self.last_kind = None;
        self.denials.clear();
    }
}

/// Consumes protocol events in arrival order and drives observer callbacks.
#[derive(Debug, Default)]
pub struct Dispatcher {
    acc: ResponseAccumulator,
}

impl Dispatcher {
    /// Create a dispatcher with an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all per-send state. Called at send entry.
    pub fn reset(&mut self) {
        self.acc.clear();
    }

    /// Text accumulated so far this send.
    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.acc.text
    }

    /// Denial records observed this send.
    #[must_use]
    pub fn denials(&self) -> &[PermissionDenial] {
        &self.acc.denials
    }

    /// Parse one framed line and dispatch it. Noise yields `None`.
    pub fn handle_line(
        &mut self,
        line: &str,
        session: &mut Session,
        observer: &mut dyn SendObserver,
    ) -> Option<SendOutcome> {
        let event = parse_line(line)?;
        self.dispatch(event, session, observer)
    }

    /// Dispatch one event, returning the terminal outcome if this event
    /// concluded the send.
    pub fn dispatch(
        &mut self,
        event: ProtocolEvent,
        session: &mut Session,
        observer: &mut dyn SendObserver,
    ) -> Option<SendOutcome> {
        // Single dedup gate upstream of all kind-specific handling.
        if let Some(uuid) = event.uuid() {
            if !self.acc.seen_uuids.insert(uuid.to_string()) {
                tracing::debug!(%uuid, "Duplicate event dropped");
                return None;
            }
        }

        if let Some(id) = event.session_id() {
            session.latch_resume_id(id);
        }

        match event {
            ProtocolEvent::System { subtype, .. } => {
                tracing::debug!(subtype = ?subtype, "System event");
                self.acc.last_kind = Some(EventKind::System);
                None
            }
            ProtocolEvent::Assistant { message, .. } => {
                self.handle_assistant_blocks(&message.content, session, observer);
                self.acc.last_kind = Some(EventKind::Assistant);
                None
            }
            ProtocolEvent::User { message, .. } => {
                for block in &message.content {
                    if let ContentBlock::ToolResult { tool_use_id } = block {
                        tracing::debug!(%tool_use_id, "Tool result observed");
                    }
                }
                self.acc.last_kind = Some(EventKind::User);
                None
            }
            ProtocolEvent::Result {
                is_error,
                error,
                permission_denials,
                ..
            } => {
                if !permission_denials.is_empty() {
                    self.acc.denials = permission_denials;
                    observer.on_permission_denied(&self.acc.denials);
                }
                self.acc.last_kind = Some(EventKind::Result);

                let outcome = if is_error {
                    SendOutcome {
                        success: false,
                        content: self.acc.text.clone(),
                        error,
                        denials: self.acc.denials.clone(),
                    }
                } else {
                    SendOutcome {
                        success: true,
                        content: self.acc.text.clone(),
                        error: None,
                        denials: self.acc.denials.clone(),
                    }
                };
                Some(outcome)
            }
            ProtocolEvent::Unknown => None,
        }
    }

    fn handle_assistant_blocks(
        &mut self,
        blocks: &[ContentBlock],
        session: &Session,
        observer: &mut dyn SendObserver,
    ) {
        // A new assistant turn after prior output gets one paragraph break
        // before its first fresh text.
        let new_turn = self.acc.last_kind != Some(EventKind::Assistant);
        let mut break_pending = new_turn && !self.acc.text.is_empty();

        for block in blocks {
            match block {
                ContentBlock::Text { text } => {
                    if !self.acc.seen_texts.insert(text.clone()) {
                        continue;
                    }
                    if break_pending {
                        self.acc.text.push_str("\n\n");
                        observer.on_text("\n\n");
                        break_pending = false;
                    }
                    self.acc.text.push_str(text);
                    observer.on_text(text);
                }
                ContentBlock::ToolUse { id, name, .. } => {
                    if !self.acc.seen_tool_ids.insert(id.clone()) {
                        continue;
                    }
                    let decision = session.decide(name);
                    tracing::debug!(tool = %name, %id, ?decision, "Tool use requested");
                    observer.on_tool_status(name, decision);
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }
    }
}
