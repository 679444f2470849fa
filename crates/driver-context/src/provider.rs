use async_trait::async_trait;
use driver_core::ContextItem;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderResult;
use crate::mentions::StructuredMentions;

/// Loads the content behind explicitly mentioned items.
#[async_trait]
pub trait MentionResolver: Send + Sync {
    async fn resolve(
        &self,
        mentions: Vec<ContextItem>,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>>;
}

/// Auxiliary provider queried with the user's free text.
#[async_trait]
pub trait OpenContextProvider: Send + Sync {
    async fn items_for(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>>;
}

/// Search-style retrieval over repositories and workspace.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(
        &self,
        mentions: &StructuredMentions,
        query: &str,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>>;
}

pub struct NoOpenContext;

#[async_trait]
impl OpenContextProvider for NoOpenContext {
    async fn items_for(
        &self,
        _query: &str,
        _cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>> {
        Ok(Vec::new())
    }
}

pub struct NoRetrieval;

#[async_trait]
impl ContextRetriever for NoRetrieval {
    async fn retrieve(
        &self,
        _mentions: &StructuredMentions,
        _query: &str,
        _cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>> {
        Ok(Vec::new())
    }
}
