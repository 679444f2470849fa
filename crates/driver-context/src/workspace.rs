//! Resolves file and symbol mentions from the local filesystem.

use std::path::PathBuf;

use async_trait::async_trait;
use driver_core::{ContextItem, ContextItemKind, Range};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderResult;
use crate::provider::MentionResolver;

pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 100 * 1024;

pub struct WorkspaceFileResolver {
    root: Option<PathBuf>,
    max_bytes: usize,
}

impl WorkspaceFileResolver {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            root: None,
            max_bytes,
        }
    }

    /// Directory that relative mention paths are resolved against.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn path_for(&self, item: &ContextItem) -> PathBuf {
        let path = item.file_path();
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }

    async fn load(&self, mut item: ContextItem) -> ProviderResult<ContextItem> {
        let path = self.path_for(&item);
        let metadata = tokio::fs::metadata(&path).await?;
        let file_size = metadata.len() as usize;

        if item.range.is_none() && file_size > self.max_bytes {
            log::info!(
                "Context file {} is too large ({} bytes > {})",
                path.display(),
                file_size,
                self.max_bytes
            );
            item.is_too_large = true;
            item.size = Some(file_size);
            item.content = None;
            return Ok(item);
        }

        let text = tokio::fs::read_to_string(&path).await?;
        let content = match item.range {
            Some(range) => slice_lines(&text, range),
            None => text,
        };

        if content.len() > self.max_bytes {
            item.is_too_large = true;
            item.size = Some(content.len());
            item.content = None;
            return Ok(item);
        }

        if item.title.is_none() {
            item.title = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
        }
        Ok(item.with_content(content))
    }
}

impl Default for WorkspaceFileResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_BYTES)
    }
}

#[async_trait]
impl MentionResolver for WorkspaceFileResolver {
    async fn resolve(
        &self,
        mentions: Vec<ContextItem>,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<ContextItem>> {
        let mut resolved = Vec::with_capacity(mentions.len());
        for item in mentions {
            if cancel.is_cancelled() {
                break;
            }
            let readable = matches!(
                item.kind,
                ContextItemKind::File | ContextItemKind::Symbol { .. }
            );
            if !readable || item.content.is_some() || item.is_ignored {
                resolved.push(item);
                continue;
            }
            resolved.push(self.load(item).await?);
        }
        Ok(resolved)
    }
}

fn slice_lines(text: &str, range: Range) -> String {
    let start = range.start.line as usize;
    let end = range.end.line.max(range.start.line) as usize;
    text.lines()
        .skip(start)
        .take(end - start + 1)
        .collect::<Vec<_>>()
        .join("\n")
}
