use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ContextItem;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatIntent {
    Chat,
    Search,
    Edit,
    Insert,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HumanMessage {
    pub text: String,
    /// Serialized prompt-editor state. Opaque to the pipeline apart from
    /// mention stripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<ContextItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manually_selected_intent: Option<ChatIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_ids: Option<Vec<String>>,
}

impl HumanMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Tool,
    Thinking,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Done,
    Error,
}

/// A server-reported unit of work shown while an answer is being produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    #[serde(rename = "type")]
    pub kind: ProcessKind,
    pub id: String,
    pub content: String,
    pub state: StepState,
}

impl ProcessingStep {
    pub fn tool(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ProcessKind::Tool,
            id: id.into(),
            content: content.into(),
            state: StepState::Pending,
        }
    }
}

/// Marks every pending step with `state`, leaving settled steps untouched.
pub fn settle_steps(steps: &mut [ProcessingStep], state: StepState) {
    for step in steps.iter_mut().filter(|s| s.state == StepState::Pending) {
        step.state = state;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageErrorKind {
    Request,
    Authentication,
    Context,
    Transport,
    Stream,
}

/// A user-visible failure attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageError {
    pub kind: MessageErrorKind,
    pub message: String,
}

impl MessageError {
    pub fn new(kind: MessageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessingStep>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessingStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_messages: Vec<SubMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<ContextItem>,
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: MessageError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_steps_only_touches_pending() {
        let mut steps = vec![
            ProcessingStep::tool("0", "searching"),
            ProcessingStep {
                state: StepState::Error,
                ..ProcessingStep::tool("1", "reading")
            },
        ];

        settle_steps(&mut steps, StepState::Done);

        assert_eq!(steps[0].state, StepState::Done);
        assert_eq!(steps[1].state, StepState::Error);
    }

    #[test]
    fn step_kind_serializes_as_type() {
        let json = serde_json::to_value(ProcessingStep::tool("0", "x")).unwrap();
        assert_eq!(json["type"], "tool");
        assert_eq!(json["state"], "pending");
    }
}
