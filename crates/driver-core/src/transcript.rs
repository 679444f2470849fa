use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{AssistantMessage, HumanMessage};

/// The asset a conversation is about. Its root node scopes requests that
/// carry no explicit source ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryAsset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub human_message: HumanMessage,
    /// `None` while the reply is pending or was never received.
    pub assistant_message: Option<AssistantMessage>,
}

impl Interaction {
    pub fn is_pending(&self) -> bool {
        self.assistant_message.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatTranscript {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_asset: Option<PrimaryAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    pub last_interaction_timestamp: DateTime<Utc>,
}

impl ChatTranscript {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            llm_session_id: None,
            primary_asset: None,
            chat_title: None,
            interactions: Vec::new(),
            last_interaction_timestamp: Utc::now(),
        }
    }

    pub fn with_random_id() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn summary(&self) -> TranscriptSummary {
        TranscriptSummary {
            id: self.id.clone(),
            title: self.chat_title.clone().unwrap_or_default(),
            interaction_count: self.interactions.len(),
            last_interaction_timestamp: self.last_interaction_timestamp,
        }
    }
}

/// Lightweight listing entry for a saved transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSummary {
    pub id: String,
    pub title: String,
    pub interaction_count: usize,
    pub last_interaction_timestamp: DateTime<Utc>,
}
