//! The live, observable transcript owned by a session controller.

use chrono::Utc;
use tokio::sync::watch;

use crate::error::{Result, TranscriptError};
use crate::message::{AssistantMessage, HumanMessage, MessageError};
use crate::context::ContextItem;
use crate::transcript::{ChatTranscript, Interaction, PrimaryAsset};

const TITLE_MAX_CHARS: usize = 40;

/// What observers see: the committed transcript plus the assistant message
/// currently being streamed, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptView {
    pub transcript: ChatTranscript,
    pub message_in_progress: Option<AssistantMessage>,
}

impl TranscriptView {
    pub fn is_message_in_progress(&self) -> bool {
        self.message_in_progress.is_some()
    }
}

pub struct TranscriptModel {
    transcript: ChatTranscript,
    in_progress: Option<AssistantMessage>,
    changes: watch::Sender<TranscriptView>,
}

impl TranscriptModel {
    pub fn new(transcript: ChatTranscript) -> Self {
        let (changes, _) = watch::channel(TranscriptView {
            transcript: transcript.clone(),
            message_in_progress: None,
        });
        Self {
            transcript,
            in_progress: None,
            changes,
        }
    }

    pub fn empty() -> Self {
        Self::new(ChatTranscript::with_random_id())
    }

    /// Rebuilds a model from a persisted transcript, optionally under a new id.
    pub fn from_transcript(mut transcript: ChatTranscript, new_id: Option<String>) -> Self {
        if let Some(id) = new_id {
            transcript.id = id;
        }
        Self::new(transcript)
    }

    /// Swaps in another transcript while keeping existing subscribers.
    pub fn replace(&mut self, transcript: ChatTranscript) {
        self.transcript = transcript;
        self.in_progress = None;
        self.publish();
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptView> {
        self.changes.subscribe()
    }

    pub fn view(&self) -> TranscriptView {
        TranscriptView {
            transcript: self.transcript.clone(),
            message_in_progress: self.in_progress.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.transcript.id
    }

    pub fn llm_session_id(&self) -> Option<&str> {
        self.transcript.llm_session_id.as_deref()
    }

    pub fn set_llm_session_id(&mut self, id: impl Into<String>) {
        self.transcript.llm_session_id = Some(id.into());
        self.publish();
    }

    pub fn subject(&self) -> Option<&PrimaryAsset> {
        self.transcript.primary_asset.as_ref()
    }

    pub fn set_subject(&mut self, asset: Option<PrimaryAsset>) {
        self.transcript.primary_asset = asset;
        self.publish();
    }

    pub fn title(&self) -> Option<&str> {
        self.transcript.chat_title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.transcript.chat_title = Some(title.into());
        self.publish();
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.transcript.interactions
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.interactions.is_empty()
    }

    pub fn last_human_index(&self) -> Option<usize> {
        self.transcript.interactions.len().checked_sub(1)
    }

    pub fn message_in_progress(&self) -> Option<&AssistantMessage> {
        self.in_progress.as_ref()
    }

    pub fn has_pending_interaction(&self) -> bool {
        self.transcript
            .interactions
            .last()
            .is_some_and(Interaction::is_pending)
    }

    /// Appends a new interaction. A still-pending previous interaction keeps
    /// its empty assistant slot: its turn was abandoned.
    pub fn add_human_message(&mut self, message: HumanMessage) {
        if self.transcript.chat_title.is_none() {
            self.transcript.chat_title = Some(title_from_text(&message.text));
        }
        self.transcript.interactions.push(Interaction {
            human_message: message,
            assistant_message: None,
        });
        self.in_progress = None;
        self.touch();
        self.publish();
    }

    /// Fills the assistant slot of the pending interaction and clears the
    /// in-progress message.
    pub fn add_bot_message(&mut self, message: AssistantMessage) -> Result<()> {
        let slot = self
            .transcript
            .interactions
            .last_mut()
            .filter(|interaction| interaction.is_pending())
            .ok_or(TranscriptError::NoPendingInteraction)?;
        slot.assistant_message = Some(message);
        self.in_progress = None;
        self.touch();
        self.publish();
        Ok(())
    }

    pub fn add_error_as_bot_message(
        &mut self,
        error: MessageError,
        context_files: Vec<ContextItem>,
    ) -> Result<()> {
        if !self.has_pending_interaction() {
            return Err(TranscriptError::NoPendingInteraction);
        }
        let mut message = self.in_progress.take().unwrap_or_default();
        message.error = Some(error);
        if message.context_files.is_empty() {
            message.context_files = context_files;
        }
        self.add_bot_message(message)
    }

    pub fn set_message_in_progress(&mut self, message: Option<AssistantMessage>) {
        self.in_progress = message;
        self.publish();
    }

    /// Drops interaction `index` and everything after it.
    pub fn truncate_from(&mut self, index: usize) -> Result<()> {
        let len = self.transcript.interactions.len();
        if index >= len {
            return Err(TranscriptError::InteractionOutOfRange { index, len });
        }
        self.transcript.interactions.truncate(index);
        self.in_progress = None;
        self.touch();
        self.publish();
        Ok(())
    }

    pub fn to_transcript(&self) -> ChatTranscript {
        self.transcript.clone()
    }

    fn touch(&mut self) {
        self.transcript.last_interaction_timestamp = Utc::now();
    }

    fn publish(&self) {
        self.changes.send_replace(self.view());
    }
}

impl Default for TranscriptModel {
    fn default() -> Self {
        Self::empty()
    }
}

fn title_from_text(text: &str) -> String {
    let trimmed = text.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageErrorKind;

    fn answered(model: &mut TranscriptModel, question: &str, answer: &str) {
        model.add_human_message(HumanMessage::new(question));
        model.add_bot_message(AssistantMessage::text(answer)).unwrap();
    }

    #[test]
    fn abandoned_interaction_keeps_empty_reply() {
        let mut model = TranscriptModel::empty();
        model.add_human_message(HumanMessage::new("one"));
        model.add_human_message(HumanMessage::new("two"));
        model.add_bot_message(AssistantMessage::text("answer")).unwrap();

        assert_eq!(model.interactions().len(), 2);
        assert!(model.interactions()[0].is_pending());
        assert_eq!(
            model.interactions()[1].assistant_message.as_ref().unwrap().text,
            "answer"
        );
    }

    #[test]
    fn bot_message_needs_pending_interaction() {
        let mut model = TranscriptModel::empty();
        assert_eq!(
            model.add_bot_message(AssistantMessage::text("hi")),
            Err(TranscriptError::NoPendingInteraction)
        );

        answered(&mut model, "q", "a");
        assert_eq!(
            model.add_bot_message(AssistantMessage::text("again")),
            Err(TranscriptError::NoPendingInteraction)
        );
        assert_eq!(
            model.interactions()[0].assistant_message.as_ref().unwrap().text,
            "a"
        );
    }

    #[test]
    fn error_reply_keeps_in_progress_steps() {
        let mut model = TranscriptModel::empty();
        model.add_human_message(HumanMessage::new("q"));
        model.set_message_in_progress(Some(AssistantMessage::text("partial")));

        model
            .add_error_as_bot_message(
                MessageError::new(MessageErrorKind::Request, "HTTP 500 - boom"),
                Vec::new(),
            )
            .unwrap();

        let reply = model.interactions()[0].assistant_message.clone().unwrap();
        assert_eq!(reply.text, "partial");
        assert_eq!(reply.error.unwrap().message, "HTTP 500 - boom");
        assert!(model.message_in_progress().is_none());
    }

    #[test]
    fn truncate_from_drops_target_and_later() {
        let mut model = TranscriptModel::empty();
        answered(&mut model, "a", "1");
        answered(&mut model, "b", "2");
        answered(&mut model, "c", "3");

        model.truncate_from(1).unwrap();

        assert_eq!(model.interactions().len(), 1);
        assert_eq!(model.interactions()[0].human_message.text, "a");
        assert_eq!(
            model.truncate_from(1),
            Err(TranscriptError::InteractionOutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn title_comes_from_first_message_only() {
        let mut model = TranscriptModel::empty();
        answered(&mut model, &"x".repeat(50), "ok");
        answered(&mut model, "second", "ok");

        let title = model.title().unwrap();
        assert_eq!(title.chars().count(), 41);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn subscribers_see_each_mutation() {
        let mut model = TranscriptModel::empty();
        let mut rx = model.subscribe();

        model.add_human_message(HumanMessage::new("q"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().transcript.interactions.len(), 1);

        model.set_message_in_progress(Some(AssistantMessage::text("Hi")));
        let view = rx.borrow_and_update().clone();
        assert_eq!(view.message_in_progress.unwrap().text, "Hi");
    }

    #[test]
    fn from_transcript_can_assign_new_id() {
        let mut original = ChatTranscript::new("old");
        original.chat_title = Some("title".into());

        let model = TranscriptModel::from_transcript(original, Some("new".into()));

        assert_eq!(model.session_id(), "new");
        assert_eq!(model.title(), Some("title"));
    }
}
