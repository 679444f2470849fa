use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// Where a context item came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContextItemSource {
    /// Explicitly @-mentioned by the user.
    User,
    Editor,
    Search,
    /// Pre-filled into the input before the user typed anything.
    Initial,
    Unified,
    Selection,
    Terminal,
    History,
    Agentic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Zero-based line range inside a document; the end line is included.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn lines(start: u32, end: u32) -> Self {
        Self {
            start: Position {
                line: start,
                character: 0,
            },
            end: Position {
                line: end,
                character: 0,
            },
        }
    }

    /// Human-readable 1-based form, e.g. `:3-7`.
    pub fn display(&self) -> String {
        let start = self.start.line + 1;
        let end = self.end.line.max(self.start.line) + 1;
        if end <= start {
            format!(":{start}")
        } else {
            format!(":{start}-{end}")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextItemKind {
    File,
    #[serde(rename_all = "camelCase")]
    Symbol {
        symbol_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol_kind: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Repository {
        repo_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_id: Option<String>,
    },
    Tree,
    /// Uploaded media (PDFs, images). Documents indexed by the backend carry
    /// the root node that scopes a chat request to them.
    #[serde(rename_all = "camelCase")]
    Media {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root_node_id: Option<String>,
    },
    #[serde(rename = "openctx", rename_all = "camelCase")]
    OpenCtx {
        provider_uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mention: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    ToolState { tool_name: String },
}

/// A single piece of context attached to (or retrieved for) a human message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ContextItemSource>,
    pub kind: ContextItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_too_large: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ignored: bool,
}

impl ContextItem {
    pub fn new(uri: impl Into<String>, kind: ContextItemKind) -> Self {
        Self {
            uri: uri.into(),
            range: None,
            source: None,
            kind,
            title: None,
            content: None,
            size: None,
            is_too_large: false,
            is_ignored: false,
        }
    }

    pub fn file(uri: impl Into<String>) -> Self {
        Self::new(uri, ContextItemKind::File)
    }

    pub fn symbol(uri: impl Into<String>, symbol_name: impl Into<String>) -> Self {
        Self::new(
            uri,
            ContextItemKind::Symbol {
                symbol_name: symbol_name.into(),
                symbol_kind: None,
            },
        )
    }

    pub fn media(
        uri: impl Into<String>,
        mime_type: impl Into<String>,
        root_node_id: Option<String>,
    ) -> Self {
        Self::new(
            uri,
            ContextItemKind::Media {
                mime_type: mime_type.into(),
                root_node_id,
            },
        )
    }

    pub fn with_source(mut self, source: ContextItemSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.size = Some(content.len());
        self.content = Some(content);
        self
    }

    /// Whether the item can contribute text to an outbound prompt.
    pub fn is_usable(&self) -> bool {
        !self.is_too_large && !self.is_ignored && self.content.is_some()
    }

    /// Root node scoping a request to this item, for indexed media only.
    pub fn root_node_id(&self) -> Option<&str> {
        match &self.kind {
            ContextItemKind::Media { root_node_id, .. } => root_node_id.as_deref(),
            _ => None,
        }
    }

    /// Local path of the item. `file://` URIs are percent-decoded; anything
    /// that is not a file URL is taken as a plain path.
    pub fn file_path(&self) -> PathBuf {
        Url::parse(&self.uri)
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
            .unwrap_or_else(|| PathBuf::from(&self.uri))
    }

    pub fn display_path(&self) -> String {
        self.file_path().display().to_string()
    }
}
