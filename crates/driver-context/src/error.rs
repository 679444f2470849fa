use driver_core::ContextItem;
use thiserror::Error;

/// Failure reported by a single context provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to resolve mentioned context: {0}")]
    Mentions(#[source] ProviderError),

    #[error("Failed to get open context: {0}")]
    OpenContext(#[source] ProviderError),

    /// Retrieval failed after explicit mentions resolved; `explicit` keeps them.
    #[error("Failed to retrieve search context: {source}")]
    Retrieval {
        explicit: Vec<ContextItem>,
        #[source]
        source: ProviderError,
    },
}

impl ContextError {
    /// Explicit items that survived the failure, if any.
    pub fn explicit_items(&self) -> &[ContextItem] {
        match self {
            ContextError::Retrieval { explicit, .. } => explicit,
            _ => &[],
        }
    }

    pub fn into_explicit_items(self) -> Vec<ContextItem> {
        match self {
            ContextError::Retrieval { explicit, .. } => explicit,
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
