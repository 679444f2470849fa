use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History writer has shut down")]
    WriterClosed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Interaction {index} does not exist (transcript has {len})")]
    InteractionOutOfRange { index: usize, len: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
