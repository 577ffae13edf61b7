//! Typed events from the agent's stream-json output.
//!
//! Each stdout line is one JSON record tagged by `type`. Four kinds carry
//! protocol meaning (`system`, `assistant`, `user`, `result`); anything else
//! on the stream is noise and is dropped without failing the send.

use serde::{Deserialize, Serialize};

/// A tool-use denial carried by a terminal `result` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDenial {
    /// Name of the tool that was refused.
    pub tool_name: String,
    /// Identifier of the refused tool-use request.
    #[serde(default)]
    pub tool_use_id: String,
    /// The input the agent attempted to pass to the tool.
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

/// One block of an assistant or user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Assistant text.
    Text {
        /// The text content.
        text: String,
    },
    /// An agent-initiated tool invocation request.
    ToolUse {
        /// Unique identifier for this tool use.
        id: String,
        /// Name of the tool being invoked.
        name: String,
        /// Tool input parameters.
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Result of a completed tool invocation (user messages only).
    ToolResult {
        /// Identifier matching the original tool use.
        tool_use_id: String,
    },
    /// Catch-all for block types this crate does not interpret.
    #[serde(other)]
    Unknown,
}

/// Message envelope holding content blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Content blocks, in order.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One protocol event, as emitted per stdout line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// System event; `subtype: "init"` opens a session.
    System {
        /// Event subtype (e.g. "init").
        #[serde(default)]
        subtype: Option<String>,
        /// Session identifier, when reported.
        #[serde(default)]
        session_id: Option<String>,
        /// Deduplication key, when present.
        #[serde(default)]
        uuid: Option<String>,
    },
    /// Assistant message carrying text and tool-use blocks.
    Assistant {
        /// Parent session identifier, when reported.
        #[serde(default)]
        session_id: Option<String>,
        /// Deduplication key, when present.
        #[serde(default)]
        uuid: Option<String>,
        /// Message body.
        #[serde(default)]
        message: Message,
    },
    /// User-side message carrying tool results. Informational only.
    User {
        /// Parent session identifier, when reported.
        #[serde(default)]
        session_id: Option<String>,
        /// Deduplication key, when present.
        #[serde(default)]
        uuid: Option<String>,
        /// Message body.
        #[serde(default)]
        message: Message,
    },
    /// Terminal event for one send.
    Result {
        /// Session identifier, when reported.
        #[serde(default)]
        session_id: Option<String>,
        /// Deduplication key, when present.
        #[serde(default)]
        uuid: Option<String>,
        /// Whether the send failed.
        #[serde(default)]
        is_error: bool,
        /// Error text when `is_error` is set.
        #[serde(default)]
        error: Option<String>,
        /// Tool uses refused for lack of permission.
        #[serde(default)]
        permission_denials: Vec<PermissionDenial>,
    },
    /// Catch-all for event types this crate does not interpret.
    #[serde(other)]
    Unknown,
}

impl ProtocolEvent {
    /// Returns true if this is a terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    /// The session id carried by this event, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::User { session_id, .. }
            | Self::Result { session_id, .. } => session_id.as_deref(),
            Self::Unknown => None,
        }
    }

    /// The deduplication key carried by this event, if any.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Self::System { uuid, .. }
            | Self::Assistant { uuid, .. }
            | Self::User { uuid, .. }
            | Self::Result { uuid, .. } => uuid.as_deref(),
            Self::Unknown => None,
        }
    }
}

/// Parse one framed line into a protocol event.
///
/// Returns `None` for anything that is not a protocol record: empty lines,
/// non-JSON output, and JSON with an unrecognized `type`. Noise is expected
/// on this stream and is logged at trace level only.
#[must_use]
pub fn parse_line(line: &str) -> Option<ProtocolEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<ProtocolEvent>(trimmed) {
        Ok(ProtocolEvent::Unknown) => {
            tracing::trace!(line = %trimmed, "Unrecognized event type, dropping");
            None
        }
        Ok(event) => Some(event),
        Err(err) => {
            tracing::trace!(error = %err, "Non-protocol line, dropping");
            None
        }
    }
}
