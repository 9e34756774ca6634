use tracing::debug;

use crate::chunk::{ChunkConfig, TextChunk, TextChunker};
use crate::error::{CoreError, Result};
use crate::extract::{extract_pages, DocumentKind};
use crate::normalize::clean_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    pub page: u32,
    pub label: Option<String>,
    pub chunk: TextChunk,
}

/// Extracts, cleans and splits a document. Chunk indices restart on every
/// page; chunks carry the page (or sheet) they came from.
pub fn load_document(
    kind: DocumentKind,
    bytes: &[u8],
    config: &ChunkConfig,
) -> Result<Vec<PageChunk>> {
    let chunker = TextChunker::new(*config);
    let mut out = Vec::new();
    for page in extract_pages(kind, bytes)? {
        let cleaned = clean_text(&page.text);
        for chunk in chunker.split(&cleaned) {
            out.push(PageChunk {
                page: page.page,
                label: page.label.clone(),
                chunk,
            });
        }
    }
    debug!(kind = kind.as_str(), chunks = out.len(), "document loaded");
    if out.is_empty() {
        return Err(CoreError::EmptyDocument);
    }
    Ok(out)
}

/// Whole-document text for one-off prompts that are not indexed. Pages are
/// separated by a blank line.
pub fn extract_context(kind: DocumentKind, bytes: &[u8]) -> Result<String> {
    let text = extract_pages(kind, bytes)?
        .iter()
        .map(|page| clean_text(&page.text))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.is_empty() {
        return Err(CoreError::EmptyDocument);
    }
    Ok(text)
}
