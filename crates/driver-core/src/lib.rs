pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod transcript;

pub use context::{ContextItem, ContextItemKind, ContextItemSource, Position, Range};
pub use error::{Result, TranscriptError};
pub use message::{
    settle_steps, AssistantMessage, ChatIntent, HumanMessage, MessageError, MessageErrorKind,
    ProcessKind, ProcessingStep, StepState, SubMessage,
};
pub use model::{TranscriptModel, TranscriptView};
pub use transcript::{ChatTranscript, Interaction, PrimaryAsset, TranscriptSummary};
