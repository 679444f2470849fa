use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("No interaction is waiting for a reply")]
    NoPendingInteraction,

    #[error("Interaction {index} does not exist (transcript has {len})")]
    InteractionOutOfRange { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, TranscriptError>;
