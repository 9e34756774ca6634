use std::io;
use std::path::{Path, PathBuf};

use auditrag_core::{load_document, stable_chunk_id, ChunkConfig, DocumentKind, PageChunk};
use auditrag_index::{ChunkInsert, ChunkMetadata, VectorIndex};
use tokio::task;
use tracing::{error, info, warn};

pub const STANDARD_SOURCE_TYPE: &str = "ESG_Standard";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub skipped_existing: bool,
    pub indexed: Vec<(String, usize)>,
    pub failed: Vec<(String, String)>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.indexed.iter().map(|(_, chunks)| chunks).sum()
    }
}

/// `GRI 305.pdf` is indexed as standard `GRI 305`.
pub fn standard_name(file_name: &str) -> String {
    file_name.replace(".pdf", "").replace(".PDF", "")
}

/// Indexes every PDF in `dir` into `collection` unless the collection
/// already exists. Without an index nothing is read. A broken file is
/// logged and skipped.
pub async fn ingest_standards(
    index: &VectorIndex,
    dir: &Path,
    collection: &str,
    chunking: &ChunkConfig,
) -> IngestReport {
    let mut report = IngestReport::default();
    if index.collection_exists(collection).await {
        info!(collection, "standards collection already exists; skipping ingestion");
        report.skipped_existing = true;
        return report;
    }
    if !index.is_configured() {
        warn!(collection, "vector index not configured; standards are not indexed");
        return report;
    }

    let listing_dir = dir.to_path_buf();
    let files = match task::spawn_blocking(move || list_pdfs(&listing_dir)).await {
        Ok(Ok(files)) => files,
        Ok(Err(err)) => {
            warn!(dir = %dir.display(), error = %err, "standards directory not readable; skipping ingestion");
            return report;
        }
        Err(err) => {
            error!(error = %err, "standards listing task failed");
            return report;
        }
    };
    if files.is_empty() {
        info!(dir = %dir.display(), "no standards PDFs found");
        return report;
    }

    info!(files = files.len(), collection, "indexing standards");
    for path in files {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        match ingest_file(index, &path, &file_name, collection, *chunking).await {
            Ok(chunks) => {
                info!(file = %file_name, chunks, "standard indexed");
                report.indexed.push((file_name, chunks));
            }
            Err(err) => {
                error!(file = %file_name, error = %err, "failed to index standard");
                report.failed.push((file_name, err.to_string()));
            }
        }
    }
    info!(
        collection,
        total_chunks = report.total_chunks(),
        failed = report.failed.len(),
        "standards indexing finished"
    );
    report
}

async fn ingest_file(
    index: &VectorIndex,
    path: &Path,
    file_name: &str,
    collection: &str,
    chunking: ChunkConfig,
) -> anyhow::Result<usize> {
    let owned = path.to_path_buf();
    let pages = task::spawn_blocking(move || -> auditrag_core::Result<Vec<PageChunk>> {
        let bytes = std::fs::read(&owned)?;
        load_document(DocumentKind::Pdf, &bytes, &chunking)
    })
    .await??;
    let name = standard_name(file_name);
    let source = format!("standards/{file_name}");
    let chunks = pages
        .into_iter()
        .map(|page| ChunkInsert {
            id: stable_chunk_id(&source, page.page, page.chunk.index),
            text: page.chunk.text,
            metadata: ChunkMetadata {
                session_id: None,
                standard_name: Some(name.clone()),
                source_type: Some(STANDARD_SOURCE_TYPE.to_string()),
                source_file: file_name.to_string(),
                page: page.page,
            },
        })
        .collect::<Vec<_>>();
    Ok(index.insert(collection, &chunks).await?)
}

fn list_pdfs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(".pdf") || name.ends_with(".PDF"))
            .unwrap_or(false);
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_name_drops_pdf_suffix() {
        assert_eq!(standard_name("GRI 305.pdf"), "GRI 305");
        assert_eq!(standard_name("IFRS_S2.PDF"), "IFRS_S2");
    }

    #[test]
    fn only_pdfs_are_listed_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt", "c.xlsx"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        let names: Vec<String> = list_pdfs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }
}
