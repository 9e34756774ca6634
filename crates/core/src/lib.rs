mod chunk;
mod embedding;
mod error;
mod extract;
mod loader;
mod normalize;

pub use chunk::{stable_chunk_id, ChunkConfig, TextChunk, TextChunker};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{CoreError, Result};
pub use extract::{
    extract_pages, DocumentKind, PageText, PDF_CONTENT_TYPE, XLSX_CONTENT_TYPE, XLS_CONTENT_TYPE,
};
pub use loader::{extract_context, load_document, PageChunk};
pub use normalize::{clean_text, strip_emphasis};
