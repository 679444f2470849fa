//! Context assembly for a chat turn.

pub mod assembler;
pub mod error;
pub mod mentions;
pub mod provider;
pub mod workspace;

pub use assembler::{combine_context, ContextAssembler, ContextOutcome, ContextQuery};
pub use error::{ContextError, ProviderError, ProviderResult, Result};
pub use mentions::{tag_user_mentions, text_without_mentions, StructuredMentions};
pub use provider::{
    ContextRetriever, MentionResolver, NoOpenContext, NoRetrieval, OpenContextProvider,
};
pub use workspace::{WorkspaceFileResolver, DEFAULT_MAX_CONTEXT_BYTES};
