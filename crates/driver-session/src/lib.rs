//! Chat session orchestration: the controller that drives a turn end to end,
//! turn cancellation, authentication state and per-account history storage.

pub mod auth;
pub mod cancellation;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod prompt;
pub mod store;
pub mod writer;

pub use auth::{auth_transition, reduce_auth, AuthEvent, AuthState, AuthStatus, AuthTransition};
pub use cancellation::CancellationCoordinator;
pub use config::DriverConfig;
pub use controller::{ChatInput, ChatNotice, ChatSessionController, ControllerDeps, TurnOutcome};
pub use error::{Result, SessionError, StorageError};
pub use history::{
    AccountKeyedChatHistory, ChatHistory, Identity, UserLocalHistory, HISTORY_STORAGE_KEY,
};
pub use prompt::{build_chat_request, PromptParts};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreResult};
pub use writer::HistoryWriter;
