//! Chat wire messages exchanged between the client and the upstream peer.
//!
//! The Bridge never inspects these; it relays bytes verbatim. They are
//! decoded only at the edges: the connection manager parses inbound text
//! with [`parse_inbound`], and callers build outbound payloads with
//! [`ChatFrame::to_json`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// `type` discriminants that map onto a [`ChatFrame`] variant.
pub const KNOWN_TYPES: [&str; 4] = ["chat_history", "chat_message", "test_message", "error"];

/// Author of a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Written by the local user.
    User,
    /// Written by the assistant.
    Assistant,
}

/// One chat entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Display name of the author.
    pub name: String,
}

/// Full chat history dump.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    /// Entries in chat order, oldest first.
    pub messages: Vec<ChatEntry>,
}

/// Recognized JSON message, tagged by `type` with the body in `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ChatFrame {
    /// Whole history, sent when the connection opens.
    ChatHistory(ChatHistory),
    /// A single new entry.
    ChatMessage(ChatEntry),
    /// Free-form probe message.
    TestMessage(String),
    /// Error report from the peer.
    Error(String),
}

impl ChatFrame {
    /// Builds a `chat_history` frame.
    #[must_use]
    pub fn history(messages: Vec<ChatEntry>) -> Self {
        Self::ChatHistory(ChatHistory { messages })
    }

    /// Builds a `chat_message` frame.
    #[must_use]
    pub fn message(role: Role, content: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ChatMessage(ChatEntry {
            role,
            content: content.into(),
            name: name.into(),
        })
    }

    /// Returns the `type` discriminant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ChatHistory(_) => "chat_history",
            Self::ChatMessage(_) => "chat_message",
            Self::TestMessage(_) => "test_message",
            Self::Error(_) => "error",
        }
    }

    /// Serializes to the compact JSON text sent as one WebSocket message.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error; none of the variants can
    /// actually fail to serialize.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound message handed to the message sink.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// One of the recognized shapes.
    Frame(ChatFrame),
    /// Well-formed JSON object whose `type` is missing or unknown.
    Unrecognized {
        /// The `type` value, if any.
        kind: Option<String>,
        /// The full decoded object.
        raw: Value,
    },
}

/// Decodes one inbound WebSocket text message.
///
/// # Errors
///
/// Returns [`ClientError::MalformedMessage`] if the text is not a JSON
/// object, or if it carries a known `type` whose `content` has the wrong
/// shape. Unknown types are not errors.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ClientError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ClientError::MalformedMessage(e.to_string()))?;
    if !value.is_object() {
        return Err(ClientError::MalformedMessage(
            "expected a JSON object".to_string(),
        ));
    }

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some(k) if KNOWN_TYPES.contains(&k) => serde_json::from_value::<ChatFrame>(value)
            .map(InboundMessage::Frame)
            .map_err(|e| ClientError::MalformedMessage(format!("invalid {k}: {e}"))),
        _ => Ok(InboundMessage::Unrecognized { kind, raw: value }),
    }
}
