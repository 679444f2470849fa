//! Wire types for the chat endpoint.
//!
//! The response body is a sequence of newline-terminated lines. Lines that
//! matter look like `data: {"kind": "...", ...}`; everything else is noise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;

/// Literal that introduces a frame payload. Whitespace after it is optional.
pub const DATA_PREFIX: &str = "data:";

const KNOWN_KINDS: &[&str] = &[
    "START_SESSION",
    "TOOL_STATUS_UPDATE",
    "REFERENCES",
    "RESPONSE_CHUNK",
    "RESPONSE_FULL",
    "END_SESSION",
    "ERROR",
];

/// Body of `POST {api_base}{chat_path}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub user_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_session_id: Option<String>,
    #[serde(default)]
    pub source_node_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    StartSession {
        llm_session_id: String,
    },
    ToolStatusUpdate {
        #[serde(default)]
        content: String,
    },
    /// Advisory only.
    References {
        #[serde(flatten)]
        payload: serde_json::Map<String, Value>,
    },
    ResponseChunk {
        #[serde(default)]
        content: String,
    },
    ResponseFull {
        #[serde(default)]
        content: String,
    },
    EndSession {
        #[serde(default)]
        content: String,
    },
    Error {
        #[serde(default)]
        error: Value,
    },
    /// A well-formed frame whose `kind` this client does not know.
    #[serde(skip)]
    Unknown { kind: Option<String>, payload: Value },
}

impl StreamEvent {
    pub fn kind(&self) -> &str {
        match self {
            StreamEvent::StartSession { .. } => "START_SESSION",
            StreamEvent::ToolStatusUpdate { .. } => "TOOL_STATUS_UPDATE",
            StreamEvent::References { .. } => "REFERENCES",
            StreamEvent::ResponseChunk { .. } => "RESPONSE_CHUNK",
            StreamEvent::ResponseFull { .. } => "RESPONSE_FULL",
            StreamEvent::EndSession { .. } => "END_SESSION",
            StreamEvent::Error { .. } => "ERROR",
            StreamEvent::Unknown { kind, .. } => kind.as_deref().unwrap_or("<missing>"),
        }
    }

    /// Message carried by an `ERROR` frame, rendered as text.
    pub fn error_message(&self) -> Option<String> {
        match self {
            StreamEvent::Error { error } => Some(match error {
                Value::String(message) => message.clone(),
                Value::Null => "Unknown error".to_string(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }

    /// Encodes the event as one wire line, trailing newline included.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(format!("{DATA_PREFIX} {}\n", serde_json::to_string(self)?))
    }
}

/// Extracts the JSON payload from one line, or `None` for blank lines and
/// lines without the data prefix.
pub fn frame_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => Some(payload.trim_start()),
        None => {
            log::debug!("Skipping non-data line: '{}'", line);
            None
        }
    }
}

/// Parses a frame payload. Unknown kinds are not an error.
pub fn parse_frame(payload: &str) -> Result<StreamEvent, FrameError> {
    let value: Value = serde_json::from_str(payload)?;
    let kind = value.get("kind").and_then(Value::as_str).map(str::to_owned);

    match kind.as_deref() {
        Some(known) if KNOWN_KINDS.contains(&known) => {
            serde_json::from_value(value).map_err(|source| FrameError::Shape {
                kind: known.to_string(),
                source,
            })
        }
        _ => Ok(StreamEvent::Unknown {
            kind,
            payload: value,
        }),
    }
}
