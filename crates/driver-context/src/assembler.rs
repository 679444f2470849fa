//! Merges explicit mentions, open-context items and retrieved items into the
//! ordered context for one turn.

use std::sync::Arc;

use driver_core::ContextItem;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ContextError, Result};
use crate::mentions::{tag_user_mentions, text_without_mentions, StructuredMentions};
use crate::provider::{
    ContextRetriever, MentionResolver, NoOpenContext, NoRetrieval, OpenContextProvider,
};
use crate::workspace::WorkspaceFileResolver;

#[derive(Debug, Clone, PartialEq)]
pub enum ContextOutcome {
    /// Explicit mentions, then open-context items, then retrieved items.
    Items(Vec<ContextItem>),
    Aborted,
}

/// What the user typed for this turn.
#[derive(Debug, Clone, Copy)]
pub struct ContextQuery<'a> {
    pub text: &'a str,
    pub editor_state: Option<&'a Value>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    mentions: Arc<dyn MentionResolver>,
    open_context: Arc<dyn OpenContextProvider>,
    retriever: Arc<dyn ContextRetriever>,
}

impl ContextAssembler {
    pub fn new(
        mentions: Arc<dyn MentionResolver>,
        open_context: Arc<dyn OpenContextProvider>,
        retriever: Arc<dyn ContextRetriever>,
    ) -> Self {
        Self {
            mentions,
            open_context,
            retriever,
        }
    }

    /// Resolves all three sources concurrently and combines them in a fixed
    /// order. Returns [`ContextOutcome::Aborted`] once `cancel` fires, never
    /// partial content.
    pub async fn retrieve_and_combine(
        &self,
        mentions: Vec<ContextItem>,
        query: ContextQuery<'_>,
        cancel: &CancellationToken,
    ) -> Result<ContextOutcome> {
        if cancel.is_cancelled() {
            return Ok(ContextOutcome::Aborted);
        }

        let mentions = tag_user_mentions(mentions);
        let structured = StructuredMentions::from_items(&mentions);
        let retrieval_text = text_without_mentions(query.text, query.editor_state);

        let explicit = self.mentions.resolve(structured.explicit(), cancel);
        let open_context = self.open_context.items_for(query.text, cancel);
        let retrieved = self.retriever.retrieve(&structured, &retrieval_text, cancel);

        let (explicit, open_context, retrieved) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ContextOutcome::Aborted),
            results = async { tokio::join!(explicit, open_context, retrieved) } => results,
        };

        if cancel.is_cancelled() {
            return Ok(ContextOutcome::Aborted);
        }

        let explicit = explicit.map_err(ContextError::Mentions)?;
        let open_context = open_context.map_err(ContextError::OpenContext)?;
        let retrieved = retrieved.map_err(|source| ContextError::Retrieval {
            explicit: explicit.clone(),
            source,
        })?;

        log::debug!(
            "Context: {} explicit, {} open-context, {} retrieved item(s)",
            explicit.len(),
            open_context.len(),
            retrieved.len()
        );

        Ok(ContextOutcome::Items(combine_context(
            explicit,
            open_context,
            retrieved,
        )))
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(
            Arc::new(WorkspaceFileResolver::default()),
            Arc::new(NoOpenContext),
            Arc::new(NoRetrieval),
        )
    }
}

pub fn combine_context(
    explicit: Vec<ContextItem>,
    open_context: Vec<ContextItem>,
    retrieved: Vec<ContextItem>,
) -> Vec<ContextItem> {
    let mut items = explicit;
    items.extend(open_context);
    items.extend(retrieved);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, ProviderResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns fixed items after a delay, recording what it was asked.
    struct Delayed {
        delay_ms: u64,
        items: Vec<ContextItem>,
        fail: bool,
        seen_query: Mutex<Option<String>>,
    }

    impl Delayed {
        fn new(delay_ms: u64, uris: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                delay_ms,
                items: uris.iter().map(|uri| ContextItem::file(*uri)).collect(),
                fail: false,
                seen_query: Mutex::new(None),
            })
        }

        fn failing(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay_ms,
                items: Vec::new(),
                fail: true,
                seen_query: Mutex::new(None),
            })
        }

        async fn answer(&self, query: Option<&str>) -> ProviderResult<Vec<ContextItem>> {
            if let Some(query) = query {
                *self.seen_query.lock().unwrap() = Some(query.to_string());
            }
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if self.fail {
                return Err(ProviderError::Failed("backend down".into()));
            }
            Ok(self.items.clone())
        }
    }

    #[async_trait]
    impl MentionResolver for Delayed {
        async fn resolve(
            &self,
            mentions: Vec<ContextItem>,
            _cancel: &CancellationToken,
        ) -> ProviderResult<Vec<ContextItem>> {
            let mut items = self.answer(None).await?;
            items.extend(mentions);
            Ok(items)
        }
    }

    #[async_trait]
    impl OpenContextProvider for Delayed {
        async fn items_for(
            &self,
            query: &str,
            _cancel: &CancellationToken,
        ) -> ProviderResult<Vec<ContextItem>> {
            self.answer(Some(query)).await
        }
    }

    #[async_trait]
    impl ContextRetriever for Delayed {
        async fn retrieve(
            &self,
            _mentions: &StructuredMentions,
            query: &str,
            _cancel: &CancellationToken,
        ) -> ProviderResult<Vec<ContextItem>> {
            self.answer(Some(query)).await
        }
    }

    fn uris(outcome: ContextOutcome) -> Vec<String> {
        match outcome {
            ContextOutcome::Items(items) => items.into_iter().map(|i| i.uri).collect(),
            ContextOutcome::Aborted => panic!("unexpected abort"),
        }
    }

    fn query(text: &str) -> ContextQuery<'_> {
        ContextQuery {
            text,
            editor_state: None,
        }
    }

    #[tokio::test]
    async fn order_is_fixed_regardless_of_completion_order() {
        for (a, b, c) in [(30, 20, 10), (10, 20, 30), (20, 10, 30), (0, 30, 0)] {
            let assembler = ContextAssembler::new(
                Delayed::new(a, &["m1"]),
                Delayed::new(b, &["c2"]),
                Delayed::new(c, &["c3a", "c3b"]),
            );

            let outcome = assembler
                .retrieve_and_combine(Vec::new(), query("q"), &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(uris(outcome), vec!["m1", "c2", "c3a", "c3b"]);
        }
    }

    #[tokio::test]
    async fn explicit_mentions_are_tagged_and_resolved() {
        let assembler = ContextAssembler::new(
            Delayed::new(0, &[]),
            Arc::new(NoOpenContext),
            Arc::new(NoRetrieval),
        );

        let outcome = assembler
            .retrieve_and_combine(
                vec![ContextItem::file("file:///a.rs")],
                query("q"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            ContextOutcome::Items(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].source, Some(driver_core::ContextItemSource::User));
            }
            ContextOutcome::Aborted => panic!("unexpected abort"),
        }
    }

    #[tokio::test]
    async fn retrieval_failure_keeps_explicit_items() {
        let assembler = ContextAssembler::new(
            Delayed::new(0, &["m1"]),
            Delayed::new(0, &["c2"]),
            Delayed::failing(0),
        );

        let err = assembler
            .retrieve_and_combine(Vec::new(), query("q"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ContextError::Retrieval { .. }));
        assert_eq!(err.explicit_items()[0].uri, "m1");
    }

    #[tokio::test]
    async fn mention_failure_propagates() {
        let assembler = ContextAssembler::new(
            Delayed::failing(0),
            Delayed::new(0, &[]),
            Delayed::new(0, &[]),
        );

        let err = assembler
            .retrieve_and_combine(Vec::new(), query("q"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ContextError::Mentions(_)));
        assert!(err.explicit_items().is_empty());
    }

    #[tokio::test]
    async fn cancellation_mid_resolution_aborts() {
        let assembler = ContextAssembler::new(
            Delayed::new(5_000, &["m1"]),
            Delayed::new(5_000, &["c2"]),
            Delayed::new(5_000, &["c3"]),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            assembler.retrieve_and_combine(Vec::new(), query("q"), &cancel),
        )
        .await
        .expect("abort should be prompt")
        .unwrap();

        assert_eq!(outcome, ContextOutcome::Aborted);
    }

    #[tokio::test]
    async fn retrieval_sees_text_without_mentions() {
        let retriever = Delayed::new(0, &[]);
        let open = Delayed::new(0, &[]);
        let assembler =
            ContextAssembler::new(Delayed::new(0, &[]), open.clone(), retriever.clone());
        let state = serde_json::json!({
            "root": { "children": [{ "type": "paragraph", "children": [
                { "type": "text", "text": "why does " },
                { "type": "contextItemMention", "text": "@lib.rs" },
                { "type": "text", "text": " panic" }
            ]}]}
        });

        assembler
            .retrieve_and_combine(
                Vec::new(),
                ContextQuery {
                    text: "why does @lib.rs panic",
                    editor_state: Some(&state),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            retriever.seen_query.lock().unwrap().as_deref(),
            Some("why does  panic")
        );
        assert_eq!(
            open.seen_query.lock().unwrap().as_deref(),
            Some("why does @lib.rs panic")
        );
    }
}
