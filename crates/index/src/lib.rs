mod embedding;
mod error;
mod local;
mod opensearch;
mod record;

use tokio::task;
use tracing::{debug, warn};

pub use embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingConfig, GeminiEmbeddingClient};
pub use error::{IndexError, Result};
pub use local::LocalIndex;
pub use opensearch::{index_mapping, knn_query, parse_hits, OpenSearchConfig, OpenSearchIndex};
pub use record::{ChunkInsert, ChunkMetadata, MetadataFilter, SearchHit};

use record::EmbeddedChunk;

#[derive(Clone)]
pub enum IndexBackend {
    OpenSearch(OpenSearchIndex),
    Local(LocalIndex),
}

/// Vector index client. With no backend configured every read degrades to
/// "nothing found" and every write fails with [`IndexError::Unavailable`].
#[derive(Clone)]
pub struct VectorIndex {
    backend: Option<IndexBackend>,
    embeddings: EmbeddingClient,
}

impl VectorIndex {
    pub fn new(backend: IndexBackend, embeddings: EmbeddingClient) -> Self {
        Self {
            backend: Some(backend),
            embeddings,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            backend: None,
            embeddings: EmbeddingClient::hash(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Some(IndexBackend::OpenSearch(_)) => "opensearch",
            Some(IndexBackend::Local(_)) => "local",
            None => "unavailable",
        }
    }

    pub async fn ping(&self) -> bool {
        match &self.backend {
            Some(IndexBackend::OpenSearch(os)) => os.ping().await,
            Some(IndexBackend::Local(local)) => {
                let local = local.clone();
                task::spawn_blocking(move || local.ping())
                    .await
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    pub async fn collection_exists(&self, collection: &str) -> bool {
        let result = match &self.backend {
            Some(IndexBackend::OpenSearch(os)) => os.collection_exists(collection).await,
            Some(IndexBackend::Local(local)) => {
                let local = local.clone();
                let name = collection.to_string();
                task::spawn_blocking(move || local.collection_exists(&name))
                    .await
                    .map_err(IndexError::from)
                    .and_then(|r| r)
            }
            None => return false,
        };
        result.unwrap_or_else(|err| {
            warn!(collection, error = %err, "could not check collection existence");
            false
        })
    }

    /// Embeds every chunk and bulk-inserts them, creating the collection on
    /// first use.
    pub async fn insert(&self, collection: &str, chunks: &[ChunkInsert]) -> Result<usize> {
        let Some(backend) = &self.backend else {
            return Err(IndexError::Unavailable);
        };
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts = chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>();
        let vectors = self.embeddings.embed_documents(&texts).await?;
        let embedded = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk {
                chunk: chunk.clone(),
                embedding,
            })
            .collect::<Vec<_>>();
        let inserted = match backend {
            IndexBackend::OpenSearch(os) => os.insert(collection, &embedded).await?,
            IndexBackend::Local(local) => {
                let local = local.clone();
                let collection = collection.to_string();
                task::spawn_blocking(move || local.insert(&collection, &embedded)).await??
            }
        };
        debug!(collection, inserted, "chunks indexed");
        Ok(inserted)
    }

    /// At most `k` nearest chunks in the backend's own similarity order.
    /// Failures are logged and reported as an empty result.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<SearchHit> {
        match self.try_search(collection, query, k, filter).await {
            Ok(hits) => hits,
            Err(IndexError::Unavailable) => Vec::new(),
            Err(err) => {
                warn!(collection, error = %err, "vector search failed");
                Vec::new()
            }
        }
    }

    pub async fn try_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let Some(backend) = &self.backend else {
            return Err(IndexError::Unavailable);
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed_query(query).await?;
        let mut hits = match backend {
            IndexBackend::OpenSearch(os) => os.search(collection, &vector, k, filter).await?,
            IndexBackend::Local(local) => {
                let local = local.clone();
                let collection = collection.to_string();
                let filter = filter.cloned();
                task::spawn_blocking(move || {
                    local.search(&collection, &vector, k, filter.as_ref())
                })
                .await??
            }
        };
        if let Some(filter) = filter {
            let before = hits.len();
            hits.retain(|hit| filter.matches(&hit.metadata));
            if hits.len() != before {
                warn!(
                    collection,
                    dropped = before - hits.len(),
                    "backend returned hits outside the metadata filter"
                );
            }
        }
        hits.truncate(k);
        Ok(hits)
    }
}
