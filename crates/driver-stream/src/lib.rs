//! Chat endpoint plumbing: request/response wire types, the HTTP client and
//! the incremental decoder for the line-delimited event stream.

pub mod auth;
pub mod client;
pub mod decoder;
pub mod error;
pub mod protocol;

pub use auth::{CredentialProvider, StaticCredentials};
pub use client::{ChatApi, ChatByteStream, HttpChatClient, DEFAULT_CHAT_PATH};
pub use decoder::{decode_stream, DecodeOutcome, FrameDecoder};
pub use error::{ChatApiError, FrameError, Result};
pub use reqwest::header::HeaderMap;
pub use protocol::{frame_payload, parse_frame, ChatRequest, StreamEvent, DATA_PREFIX};
