//! HTTP client for the streaming chat endpoint.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

use crate::auth::CredentialProvider;
use crate::error::{ChatApiError, Result};
use crate::protocol::ChatRequest;

pub const DEFAULT_CHAT_PATH: &str = "/tmp/chat";

/// Raw response body, chunked however the transport delivers it.
pub type ChatByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Sends `request` and returns the body once the server answered 200.
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChatByteStream>;
}

pub struct HttpChatClient {
    client: Client,
    base_url: String,
    chat_path: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            credentials,
        }
    }

    pub fn with_chat_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.chat_path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }
}

#[async_trait]
impl ChatApi for HttpChatClient {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChatByteStream> {
        let mut headers = self.credentials.auth_headers().await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        log::debug!(
            "POST {} ({} source node(s), session {:?})",
            self.endpoint(),
            request.source_node_ids.len(),
            request.llm_session_id
        );

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                return Err(ChatApiError::Unauthorized { body });
            }
            return Err(ChatApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatApiError::Transport));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_tests_disabled() -> bool {
        std::env::var_os("CODEX_SANDBOX_NETWORK_DISABLED").is_some()
    }

    fn client(server: &MockServer) -> HttpChatClient {
        HttpChatClient::new(
            server.uri(),
            Arc::new(StaticCredentials::new(Some("secret".into()))),
        )
    }

    fn request() -> ChatRequest {
        ChatRequest {
            user_prompt: "hello\n\n".into(),
            llm_session_id: None,
            source_node_ids: vec!["root-1".into()],
        }
    }

    async fn collect(mut stream: ChatByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn posts_request_and_streams_body() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        let body = "data: {\"kind\":\"RESPONSE_CHUNK\",\"content\":\"Hi\"}\n";

        Mock::given(method("POST"))
            .and(path("/tmp/chat"))
            .and(header("authorization", "Bearer secret"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "user_prompt": "hello\n\n",
                "source_node_ids": ["root-1"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let stream = client(&server).open_chat_stream(&request()).await.unwrap();

        assert_eq!(collect(stream).await, body.as_bytes());
    }

    #[tokio::test]
    async fn custom_chat_path_is_used() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/chat"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).with_chat_path("v2/chat");
        assert!(client.endpoint().ends_with("/v2/chat"));
        client.open_chat_stream(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_is_reported_with_body() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&server)
            .await;

        let err = match client(&server).open_chat_stream(&request()).await {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };

        assert!(matches!(&err, ChatApiError::Unauthorized { body } if body == "token expired"));
        assert_eq!(err.to_string(), "HTTP 401 - token expired");
    }

    #[tokio::test]
    async fn other_failures_drain_the_error_body() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = match client(&server).open_chat_stream(&request()).await {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };

        assert_eq!(err.to_string(), "HTTP 502 - upstream unavailable");
    }
}
