//! Session controller: runs chat turns against one live transcript.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use driver_context::{ContextAssembler, ContextOutcome, ContextQuery};
use driver_core::{
    settle_steps, AssistantMessage, ChatIntent, ChatTranscript, ContextItem, HumanMessage,
    MessageError, MessageErrorKind, PrimaryAsset, ProcessingStep, StepState, TranscriptModel,
    TranscriptSummary, TranscriptView,
};
use driver_stream::{
    decode_stream, ChatApi, ChatApiError, CredentialProvider, DecodeOutcome, StreamEvent,
};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{auth_transition, AuthStatus, AuthTransition};
use crate::cancellation::CancellationCoordinator;
use crate::error::{Result, SessionError};
use crate::history::{AccountKeyedChatHistory, Identity};
use crate::prompt::{build_chat_request, PromptParts};
use crate::writer::HistoryWriter;

const NOTICE_CAPACITY: usize = 16;

/// Collaborators handed to a controller at construction.
pub struct ControllerDeps {
    pub chat_api: Arc<dyn ChatApi>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub assembler: ContextAssembler,
    pub history: HistoryWriter,
    pub auth: watch::Receiver<AuthStatus>,
    /// Scoping root used when neither the turn nor the subject supplies one.
    pub default_root_node_id: Option<String>,
}

/// One submitted message and what came with it.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub request_id: String,
    pub text: String,
    pub mentions: Vec<ContextItem>,
    pub editor_state: Option<Value>,
    pub intent: Option<ChatIntent>,
    pub source_node_ids: Option<Vec<String>>,
}

impl ChatInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<ContextItem>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_editor_state(mut self, editor_state: Value) -> Self {
        self.editor_state = Some(editor_state);
        self
    }

    pub fn with_intent(mut self, intent: ChatIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_source_node_ids(mut self, ids: Vec<String>) -> Self {
        self.source_node_ids = Some(ids);
        self
    }

    fn human_message(&self) -> HumanMessage {
        HumanMessage {
            text: self.text.clone(),
            editor_state: self.editor_state.clone(),
            context_files: self.mentions.clone(),
            manually_selected_intent: self.intent,
            source_node_ids: self.source_node_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed,
    Failed(MessageError),
    /// Cancelled by `abort`, a newer turn or a session change.
    Aborted,
}

/// Out-of-transcript notifications for the supervisory layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatNotice {
    AuthenticationFailed(String),
    Error(String),
}

struct SessionState {
    model: TranscriptModel,
    cancellation: CancellationCoordinator,
    /// Identity whose history the live transcript is saved into; set when the
    /// session starts, is restored or is reset.
    owner: Option<Identity>,
}

/// Per-turn accumulation while the response streams in.
struct TurnState {
    text: String,
    steps: Vec<ProcessingStep>,
    context: Vec<ContextItem>,
    finished: bool,
    failure: Option<MessageError>,
}

impl TurnState {
    fn new(context: Vec<ContextItem>) -> Self {
        Self {
            text: String::new(),
            steps: Vec::new(),
            context,
            finished: false,
            failure: None,
        }
    }

    fn in_progress(&self) -> AssistantMessage {
        AssistantMessage {
            text: self.text.clone(),
            processes: self.steps.clone(),
            context_files: self.context.clone(),
            ..Default::default()
        }
    }
}

pub struct ChatSessionController {
    state: Mutex<SessionState>,
    chat_api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialProvider>,
    assembler: ContextAssembler,
    history: HistoryWriter,
    auth: watch::Receiver<AuthStatus>,
    default_root_node_id: Option<String>,
    notices: broadcast::Sender<ChatNotice>,
}

impl ChatSessionController {
    pub fn new(deps: ControllerDeps) -> Self {
        Self::with_transcript(deps, ChatTranscript::with_random_id())
    }

    pub fn with_transcript(deps: ControllerDeps, transcript: ChatTranscript) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let owner = deps.auth.borrow().identity().cloned();
        Self {
            state: Mutex::new(SessionState {
                model: TranscriptModel::new(transcript),
                cancellation: CancellationCoordinator::new(),
                owner,
            }),
            chat_api: deps.chat_api,
            credentials: deps.credentials,
            assembler: deps.assembler,
            history: deps.history,
            auth: deps.auth,
            default_root_node_id: deps.default_root_node_id,
            notices,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the model unless `token` was cancelled. The check and the
    /// mutation happen under the lock `abort` takes.
    fn guarded<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut TranscriptModel) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if token.is_cancelled() {
            return None;
        }
        Some(f(&mut state.model))
    }

    fn identity(&self) -> Option<Identity> {
        self.auth.borrow().identity().cloned()
    }

    fn notify(&self, notice: ChatNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    /// Queues the current transcript for saving under its owner. Empty
    /// transcripts are skipped.
    fn persist(&self) {
        let (owner, transcript) = {
            let state = self.lock();
            (state.owner.clone(), state.model.to_transcript())
        };
        if transcript.interactions.is_empty() {
            return;
        }
        self.history.save(owner, transcript);
    }

    pub fn session_id(&self) -> String {
        self.lock().model.session_id().to_string()
    }

    pub fn view(&self) -> TranscriptView {
        self.lock().model.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptView> {
        self.lock().model.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ChatNotice> {
        self.notices.subscribe()
    }

    pub fn is_turn_active(&self) -> bool {
        self.lock().cancellation.is_active()
    }

    /// Starts a new turn, cancelling any turn still running for this session.
    pub async fn submit(&self, input: ChatInput) -> TurnOutcome {
        let token = {
            let mut state = self.lock();
            let token = state.cancellation.start();
            state.model.add_human_message(input.human_message());
            state
                .model
                .set_message_in_progress(Some(AssistantMessage::default()));
            token
        };
        self.run_turn(token, input).await
    }

    /// Drops interaction `target` (default: the last one) and everything
    /// after it, then submits `input` in its place.
    pub async fn edit(&self, input: ChatInput, target: Option<usize>) -> Result<TurnOutcome> {
        let token = {
            let mut state = self.lock();
            let len = state.model.interactions().len();
            let index = match target.or_else(|| state.model.last_human_index()) {
                Some(index) if index < len => index,
                other => {
                    return Err(SessionError::InteractionOutOfRange {
                        index: other.unwrap_or(0),
                        len,
                    })
                }
            };
            let token = state.cancellation.start();
            state
                .model
                .truncate_from(index)
                .map_err(|_| SessionError::InteractionOutOfRange { index, len })?;
            state.model.add_human_message(input.human_message());
            state
                .model
                .set_message_in_progress(Some(AssistantMessage::default()));
            token
        };
        Ok(self.run_turn(token, input).await)
    }

    /// Cancels the running turn. Nothing from it reaches the transcript after
    /// this returns.
    pub fn abort(&self) {
        let mut state = self.lock();
        if state.cancellation.is_active() {
            log::info!("[{}] Aborting current turn", state.model.session_id());
        }
        state.cancellation.cancel();
        if state.model.message_in_progress().is_some() {
            state.model.set_message_in_progress(None);
        }
    }

    async fn run_turn(&self, token: CancellationToken, input: ChatInput) -> TurnOutcome {
        let session_id = self.session_id();
        log::info!("[{}] Turn {} started", session_id, input.request_id);
        self.persist();

        let outcome = self.execute_turn(&session_id, &token, &input).await;

        {
            let mut state = self.lock();
            // Only the newest turn's token can still be live.
            if !token.is_cancelled() {
                state.cancellation.cancel();
            }
        }
        match &outcome {
            TurnOutcome::Completed => log::info!("[{}] Turn completed", session_id),
            TurnOutcome::Failed(error) => log::warn!("[{}] Turn failed: {}", session_id, error),
            TurnOutcome::Aborted => log::info!("[{}] Turn aborted", session_id),
        }
        outcome
    }

    async fn execute_turn(
        &self,
        session_id: &str,
        token: &CancellationToken,
        input: &ChatInput,
    ) -> TurnOutcome {
        if token.is_cancelled() {
            return TurnOutcome::Aborted;
        }

        let query = ContextQuery {
            text: &input.text,
            editor_state: input.editor_state.as_ref(),
        };
        let context = match self
            .assembler
            .retrieve_and_combine(input.mentions.clone(), query, token)
            .await
        {
            Ok(ContextOutcome::Items(items)) => items,
            Ok(ContextOutcome::Aborted) => return TurnOutcome::Aborted,
            Err(err) => {
                log::warn!("[{}] Context resolution failed: {}", session_id, err);
                let error = MessageError::new(MessageErrorKind::Context, err.to_string());
                return self.fail(token, error, err.into_explicit_items());
            }
        };

        let turn = TurnState::new(context);
        let Some(request) = self.guarded(token, |model| {
            model.set_message_in_progress(Some(turn.in_progress()));
            let root = model
                .subject()
                .and_then(|subject| subject.root_node_id.clone())
                .or_else(|| self.default_root_node_id.clone());
            build_chat_request(PromptParts {
                text: &input.text,
                context: &turn.context,
                mentions: &input.mentions,
                source_node_ids: input.source_node_ids.as_deref(),
                default_root_node_id: root.as_deref(),
                llm_session_id: model.llm_session_id(),
            })
        }) else {
            return TurnOutcome::Aborted;
        };

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return TurnOutcome::Aborted,
            opened = self.chat_api.open_chat_stream(&request) => opened,
        };
        let body = match opened {
            Ok(body) => body,
            Err(err) => return self.request_failed(session_id, token, err, turn.context).await,
        };

        let mut turn = turn;
        let decoded = decode_stream(body, token, |event| {
            self.apply_event(session_id, token, &mut turn, event)
        })
        .await;

        match decoded {
            Ok(DecodeOutcome::Cancelled) => TurnOutcome::Aborted,
            Ok(DecodeOutcome::Stopped) => match turn.failure {
                Some(error) => TurnOutcome::Failed(error),
                None if token.is_cancelled() => TurnOutcome::Aborted,
                None => TurnOutcome::Completed,
            },
            Ok(DecodeOutcome::Finished) => self.finish_without_final(token, turn),
            Err(err) if turn.finished => {
                log::warn!("[{}] Stream error after final answer: {}", session_id, err);
                TurnOutcome::Completed
            }
            Err(err) => {
                let error = MessageError::new(MessageErrorKind::Transport, err.to_string());
                self.notify(ChatNotice::Error(error.message.clone()));
                self.fail(token, error, turn.context)
            }
        }
    }

    async fn request_failed(
        &self,
        session_id: &str,
        token: &CancellationToken,
        err: ChatApiError,
        context: Vec<ContextItem>,
    ) -> TurnOutcome {
        let kind = match &err {
            ChatApiError::Unauthorized { .. } => {
                log::warn!("[{}] Chat request rejected with 401, revalidating", session_id);
                if let Err(e) = self.credentials.revalidate().await {
                    log::error!("[{}] Credential revalidation failed: {}", session_id, e);
                    self.notify(ChatNotice::AuthenticationFailed(e.to_string()));
                }
                MessageErrorKind::Authentication
            }
            ChatApiError::Auth(_) => MessageErrorKind::Authentication,
            ChatApiError::Http { .. } => MessageErrorKind::Request,
            ChatApiError::Transport(_) => MessageErrorKind::Transport,
        };
        let error = MessageError::new(kind, err.to_string());
        if kind != MessageErrorKind::Authentication {
            self.notify(ChatNotice::Error(error.message.clone()));
        }
        self.fail(token, error, context)
    }

    /// Attaches `error` to the pending interaction and ends the turn.
    fn fail(
        &self,
        token: &CancellationToken,
        error: MessageError,
        context: Vec<ContextItem>,
    ) -> TurnOutcome {
        let applied = self.guarded(token, |model| {
            if let Err(e) = model.add_error_as_bot_message(error.clone(), context) {
                log::warn!("[{}] Could not record error reply: {}", model.session_id(), e);
            }
        });
        if applied.is_none() {
            return TurnOutcome::Aborted;
        }
        self.persist();
        TurnOutcome::Failed(error)
    }

    fn finish_without_final(&self, token: &CancellationToken, mut turn: TurnState) -> TurnOutcome {
        if turn.finished {
            return TurnOutcome::Completed;
        }
        if turn.text.is_empty() {
            settle_steps(&mut turn.steps, StepState::Error);
            let error = MessageError::new(
                MessageErrorKind::Stream,
                "response ended before any content was received",
            );
            return self.fail(token, error, turn.context);
        }

        settle_steps(&mut turn.steps, StepState::Done);
        let message = turn.in_progress();
        let applied = self.guarded(token, |model| model.add_bot_message(message));
        match applied {
            None => TurnOutcome::Aborted,
            Some(result) => {
                if let Err(e) = result {
                    log::warn!("Could not record reply: {}", e);
                }
                self.persist();
                TurnOutcome::Completed
            }
        }
    }

    fn apply_event(
        &self,
        session_id: &str,
        token: &CancellationToken,
        turn: &mut TurnState,
        event: StreamEvent,
    ) -> ControlFlow<()> {
        let applied = match event {
            StreamEvent::StartSession { llm_session_id } => {
                log::debug!("[{}] Remote session {}", session_id, llm_session_id);
                let applied = self.guarded(token, |model| model.set_llm_session_id(llm_session_id));
                if applied.is_some() {
                    self.persist();
                }
                applied
            }
            StreamEvent::ToolStatusUpdate { content } => {
                if turn.finished {
                    return ControlFlow::Continue(());
                }
                turn.steps
                    .push(ProcessingStep::tool(turn.steps.len().to_string(), content));
                let message = turn.in_progress();
                self.guarded(token, |model| model.set_message_in_progress(Some(message)))
            }
            StreamEvent::References { payload } => {
                log::debug!("[{}] References: {:?}", session_id, payload);
                Some(())
            }
            StreamEvent::ResponseChunk { content } => {
                if turn.finished {
                    log::debug!("[{}] Ignoring chunk after final answer", session_id);
                    return ControlFlow::Continue(());
                }
                turn.text.push_str(&content);
                let message = turn.in_progress();
                self.guarded(token, |model| model.set_message_in_progress(Some(message)))
            }
            StreamEvent::ResponseFull { content } | StreamEvent::EndSession { content } => {
                if turn.finished {
                    return ControlFlow::Continue(());
                }
                settle_steps(&mut turn.steps, StepState::Done);
                let message = AssistantMessage {
                    text: content,
                    ..turn.in_progress()
                };
                let applied = self.guarded(token, |model| {
                    if let Err(e) = model.add_bot_message(message) {
                        log::warn!("[{}] Could not record reply: {}", session_id, e);
                    }
                });
                if applied.is_some() {
                    turn.finished = true;
                    self.persist();
                }
                applied
            }
            StreamEvent::Error { .. } => {
                let message = event
                    .error_message()
                    .unwrap_or_else(|| "Unknown error".to_string());
                if turn.finished {
                    log::warn!("[{}] Error after final answer: {}", session_id, message);
                    return ControlFlow::Break(());
                }
                settle_steps(&mut turn.steps, StepState::Error);
                let error = MessageError::new(MessageErrorKind::Stream, message);
                let in_progress = turn.in_progress();
                let context = turn.context.clone();
                let applied = self.guarded(token, |model| {
                    model.set_message_in_progress(Some(in_progress));
                    if let Err(e) = model.add_error_as_bot_message(error.clone(), context) {
                        log::warn!("[{}] Could not record error reply: {}", session_id, e);
                    }
                });
                if applied.is_some() {
                    turn.failure = Some(error);
                    self.persist();
                }
                return ControlFlow::Break(());
            }
            StreamEvent::Unknown { kind, payload } => {
                log::error!(
                    "[{}] Unknown message kind {:?}: {}",
                    session_id,
                    kind,
                    payload
                );
                if turn.finished {
                    return ControlFlow::Continue(());
                }
                let diagnostic = AssistantMessage {
                    text: format!("Unknown message kind: {}", payload),
                    ..turn.in_progress()
                };
                self.guarded(token, |model| model.set_message_in_progress(Some(diagnostic)))
            }
        };

        match applied {
            Some(()) => ControlFlow::Continue(()),
            None => ControlFlow::Break(()),
        }
    }

    /// Starts an empty transcript about the same subject.
    pub fn new_session(&self) -> String {
        self.reset_session(self.identity())
    }

    fn reset_session(&self, owner: Option<Identity>) -> String {
        let mut state = self.lock();
        state.cancellation.cancel();
        let mut transcript = ChatTranscript::with_random_id();
        transcript.primary_asset = state.model.subject().cloned();
        let id = transcript.id.clone();
        state.model.replace(transcript);
        state.owner = owner;
        log::info!("[{}] New session", id);
        id
    }

    /// Replaces the live transcript with a saved one.
    pub async fn restore(&self, id: &str) -> Result<()> {
        let identity = self.identity().ok_or(SessionError::NotAuthenticated)?;
        self.persist();
        self.history.flush().await?;
        let transcript = self
            .history
            .history()
            .load(Some(&identity), id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;

        let mut state = self.lock();
        state.cancellation.cancel();
        state.model.replace(transcript);
        state.owner = Some(identity);
        log::info!("[{}] Session restored", id);
        Ok(())
    }

    /// Copies the live transcript under `new_id` (random when `None`) and
    /// continues in the copy.
    pub fn duplicate(&self, new_id: Option<String>) -> String {
        let id = {
            let mut state = self.lock();
            state.cancellation.cancel();
            let source = state.model.session_id().to_string();
            let copy = TranscriptModel::from_transcript(
                state.model.to_transcript(),
                Some(new_id.unwrap_or_else(|| Uuid::new_v4().to_string())),
            );
            let id = copy.session_id().to_string();
            state.model.replace(copy.to_transcript());
            log::info!("[{}] Duplicated from {}", id, source);
            id
        };
        self.persist();
        id
    }

    pub fn set_subject(&self, subject: Option<PrimaryAsset>) {
        self.lock().model.set_subject(subject);
        self.persist();
    }

    /// Reacts to an authentication change observed by the supervisory layer.
    pub fn handle_auth_change(&self, previous: &AuthStatus, current: &AuthStatus) {
        match auth_transition(previous, current) {
            AuthTransition::SignedOut(identity) => {
                log::info!("Signed out; clearing history for {}", identity.key());
                self.reset_session(None);
                self.history.clear(Some(identity));
            }
            AuthTransition::IdentityChanged => {
                log::info!("Identity changed; starting a new session");
                self.reset_session(current.identity().cloned());
            }
            AuthTransition::SignedIn => {
                // An anonymous session is adopted by whoever signs in.
                let mut state = self.lock();
                if state.owner.is_none() {
                    state.owner = current.identity().cloned();
                }
            }
            AuthTransition::Unchanged => {}
        }
    }

    /// Follows the auth channel and applies [`Self::handle_auth_change`]
    /// until the controller or the channel goes away.
    pub fn spawn_auth_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let mut rx = self.auth.clone();
        tokio::spawn(async move {
            let mut previous = rx.borrow_and_update().clone();
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_auth_change(&previous, &current);
                previous = current;
            }
        })
    }

    /// Removes a saved session; deleting the live one also starts a new session.
    pub fn delete_session(&self, id: &str) {
        if self.session_id() == id {
            self.new_session();
        }
        self.history.delete(self.identity(), id);
    }

    pub fn clear_history(&self) {
        self.history.clear(self.identity());
    }

    pub async fn flush(&self) -> Result<()> {
        Ok(self.history.flush().await?)
    }

    /// Saved sessions, most recently active first.
    pub async fn history(&self) -> Result<Vec<TranscriptSummary>> {
        self.history.flush().await?;
        Ok(self
            .history
            .history()
            .summaries(self.identity().as_ref())
            .await?)
    }

    pub async fn load_session(&self, id: &str) -> Result<ChatTranscript> {
        self.history.flush().await?;
        self.history
            .history()
            .load(self.identity().as_ref(), id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }

    pub async fn export_history(&self) -> Result<AccountKeyedChatHistory> {
        self.history.flush().await?;
        Ok(self
            .history
            .history()
            .export(self.identity().as_ref())
            .await?)
    }

    pub async fn import_history(
        &self,
        history: AccountKeyedChatHistory,
        merge: bool,
    ) -> Result<()> {
        self.history.flush().await?;
        Ok(self.history.history().import(history, merge).await?)
    }
}
