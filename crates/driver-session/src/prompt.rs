//! Builds the outbound chat request for a turn.

use driver_core::{ContextItem, ContextItemKind};
use driver_stream::ChatRequest;

/// Inputs for one outbound request.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub text: &'a str,
    /// Resolved context, in assembler order.
    pub context: &'a [ContextItem],
    /// The mentions the user attached, before resolution.
    pub mentions: &'a [ContextItem],
    pub source_node_ids: Option<&'a [String]>,
    pub default_root_node_id: Option<&'a str>,
    pub llm_session_id: Option<&'a str>,
}

pub fn build_chat_request(parts: PromptParts<'_>) -> ChatRequest {
    ChatRequest {
        user_prompt: format!("{}\n\n{}", parts.text, extra_context(parts.context)),
        llm_session_id: parts.llm_session_id.map(str::to_owned),
        source_node_ids: source_node_ids(
            parts.source_node_ids,
            parts.mentions,
            parts.default_root_node_id,
        ),
    }
}

/// File and symbol context rendered as text, blank-line separated.
pub fn extra_context(items: &[ContextItem]) -> String {
    items
        .iter()
        .filter_map(render_context_item)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_context_item(item: &ContextItem) -> Option<String> {
    if !item.is_usable() {
        return None;
    }
    let content = item.content.as_deref()?;
    let path = item.display_path();
    match &item.kind {
        ContextItemKind::File => {
            let range = item.range.map(|r| r.display()).unwrap_or_default();
            Some(format!(
                "Codebase context from file {}{}:\n```\n{}\n```",
                path, range, content
            ))
        }
        ContextItemKind::Symbol { symbol_name, .. } => Some(format!(
            "Codebase context from symbol {} in {}:\n```\n{}\n```",
            symbol_name, path, content
        )),
        _ => None,
    }
}

/// Explicit ids plus the root nodes of mentioned media; the default root
/// only when that yields nothing.
pub fn source_node_ids(
    explicit: Option<&[String]>,
    mentions: &[ContextItem],
    default_root_node_id: Option<&str>,
) -> Vec<String> {
    let mut ids: Vec<String> = explicit.map(<[String]>::to_vec).unwrap_or_default();
    ids.extend(
        mentions
            .iter()
            .filter_map(ContextItem::root_node_id)
            .map(str::to_owned),
    );
    if ids.is_empty() {
        if let Some(root) = default_root_node_id {
            ids.push(root.to_string());
        }
    }
    ids
}
