//! Credential seam used by the chat client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::RwLock;

use crate::error::{ChatApiError, Result};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Headers that authenticate one request.
    async fn auth_headers(&self) -> Result<HeaderMap>;

    /// Re-checks credentials after the server rejected them.
    async fn revalidate(&self) -> Result<()>;
}

/// A bearer token, optionally re-read from an environment variable on
/// revalidation.
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    env_var: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
            env_var: None,
        }
    }

    /// Uses `env_var` as the token source for [`CredentialProvider::revalidate`].
    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = Some(env_var.into());
        self
    }

    pub fn from_env(env_var: impl Into<String>) -> Self {
        let env_var = env_var.into();
        let token = std::env::var(&env_var).ok();
        Self::new(token).with_env_var(env_var)
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.token.read().await.as_deref() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ChatApiError::Auth(format!("Invalid API token: {}", e)))?,
            );
        }
        Ok(headers)
    }

    async fn revalidate(&self) -> Result<()> {
        let Some(env_var) = self.env_var.as_deref() else {
            return Err(ChatApiError::Auth(
                "No credential source to revalidate against".to_string(),
            ));
        };

        let fresh = std::env::var(env_var)
            .ok()
            .filter(|t| !t.trim().is_empty());
        let mut token = self.token.write().await;
        match fresh {
            Some(fresh) => {
                log::info!("Reloaded API token from {}", env_var);
                *token = Some(fresh);
                Ok(())
            }
            None => {
                *token = None;
                Err(ChatApiError::Auth(format!("{} is not set", env_var)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bearer_header_when_token_present() {
        let credentials = StaticCredentials::new(Some("abc".into()));

        let headers = credentials.auth_headers().await.unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
    }

    #[tokio::test]
    async fn no_header_without_token() {
        let credentials = StaticCredentials::new(Some("  ".into()));

        assert!(credentials.auth_headers().await.unwrap().is_empty());
        assert!(!credentials.has_token().await);
    }

    #[tokio::test]
    async fn revalidate_rereads_environment() {
        let var = "DRIVER_STREAM_TEST_TOKEN_RELOAD";
        std::env::remove_var(var);
        let credentials = StaticCredentials::new(Some("old".into())).with_env_var(var);

        assert!(matches!(
            credentials.revalidate().await,
            Err(ChatApiError::Auth(_))
        ));
        assert!(!credentials.has_token().await);

        std::env::set_var(var, "new");
        credentials.revalidate().await.unwrap();
        let headers = credentials.auth_headers().await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer new");
        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn revalidate_without_source_fails() {
        let credentials = StaticCredentials::new(Some("abc".into()));
        assert!(credentials.revalidate().await.is_err());
    }
}
