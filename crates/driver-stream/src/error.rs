use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatApiError {
    #[error("HTTP 401 - {body}")]
    Unauthorized { body: String },

    #[error("HTTP {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, ChatApiError>;

/// Why a single frame could not be turned into an event.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed {kind} frame: {source}")]
    Shape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
