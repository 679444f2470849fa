//! Mention grouping and mention-markup removal.

use driver_core::{ContextItem, ContextItemKind, ContextItemSource};
use serde_json::Value;

const MENTION_NODE: &str = "contextItemMention";

/// Mentions grouped by kind, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredMentions {
    pub repositories: Vec<ContextItem>,
    pub trees: Vec<ContextItem>,
    pub symbols: Vec<ContextItem>,
    pub files: Vec<ContextItem>,
    pub open_ctx: Vec<ContextItem>,
    pub media: Vec<ContextItem>,
    /// Kinds that neither the resolver nor the retriever consume.
    pub other: Vec<ContextItem>,
}

impl StructuredMentions {
    pub fn from_items(items: &[ContextItem]) -> Self {
        let mut mentions = Self::default();
        for item in items {
            let bucket = match item.kind {
                ContextItemKind::Repository { .. } => &mut mentions.repositories,
                ContextItemKind::Tree => &mut mentions.trees,
                ContextItemKind::Symbol { .. } => &mut mentions.symbols,
                ContextItemKind::File => &mut mentions.files,
                ContextItemKind::OpenCtx { .. } => &mut mentions.open_ctx,
                ContextItemKind::Media { .. } => &mut mentions.media,
                ContextItemKind::ToolState { .. } => &mut mentions.other,
            };
            bucket.push(item.clone());
        }
        mentions
    }

    /// Mentions whose content is resolved directly: symbols, files, open-ctx
    /// items and media, in that order.
    pub fn explicit(&self) -> Vec<ContextItem> {
        [&self.symbols, &self.files, &self.open_ctx, &self.media]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
            && self.trees.is_empty()
            && self.symbols.is_empty()
            && self.files.is_empty()
            && self.open_ctx.is_empty()
            && self.media.is_empty()
            && self.other.is_empty()
    }
}

/// Marks mentions that arrive without provenance as user-selected.
pub fn tag_user_mentions(items: Vec<ContextItem>) -> Vec<ContextItem> {
    items
        .into_iter()
        .map(|mut item| {
            if item.source.is_none() {
                item.source = Some(ContextItemSource::User);
            }
            item
        })
        .collect()
}

/// Returns the user's text with mention chips removed.
///
/// `editor_state` is the serialized prompt editor tree. Without it, or when
/// it has no recognisable root, `text` is returned unchanged.
pub fn text_without_mentions(text: &str, editor_state: Option<&Value>) -> String {
    let root = editor_state.and_then(|state| {
        state
            .get("lexicalEditorState")
            .unwrap_or(state)
            .get("root")
    });
    match root {
        Some(root) => {
            let mut out = String::new();
            let mut previous_was_paragraph = false;
            for child in children(root) {
                let is_paragraph = node_type(child) == Some("paragraph");
                if is_paragraph && previous_was_paragraph {
                    out.push('\n');
                }
                collect_text(child, &mut out);
                previous_was_paragraph = is_paragraph;
            }
            out.trim().to_string()
        }
        None => text.to_string(),
    }
}

fn node_type(node: &Value) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

fn children(node: &Value) -> impl Iterator<Item = &Value> {
    node.get("children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn collect_text(node: &Value, out: &mut String) {
    match node_type(node) {
        Some(MENTION_NODE) => {}
        Some("linebreak") => out.push('\n'),
        Some("tab") => out.push_str(node.get("text").and_then(Value::as_str).unwrap_or("\t")),
        Some("text") => {
            if let Some(text) = node.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        _ => {
            for child in children(node) {
                collect_text(child, out);
            }
        }
    }
}
