use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::record::{ChunkMetadata, EmbeddedChunk, MetadataFilter, SearchHit};

const VECTOR_FIELD: &str = "vector_field";
const TEXT_FIELD: &str = "text";
const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSearchConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub verify_certs: bool,
    pub timeout: Duration,
}

impl OpenSearchConfig {
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.port)
        } else {
            format!("https://{host}:{}", self.port)
        }
    }
}

#[derive(Clone)]
pub struct OpenSearchIndex {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl OpenSearchIndex {
    pub fn new(config: &OpenSearchConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!config.verify_certs)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.user, Some(&self.password))
    }

    pub async fn ping(&self) -> bool {
        match self.request(self.http.get(&self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(error = %err, "opensearch ping failed");
                false
            }
        }
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        let url = format!("{}/{name}", self.base_url);
        let response = self.request(self.http.head(url)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(IndexError::Backend {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn ensure_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }
        let url = format!("{}/{name}", self.base_url);
        let response = self
            .request(self.http.put(url))
            .json(&index_mapping(dimensions))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!(collection = name, dimensions, "created opensearch index");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        // a concurrent creator won the race
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexError::Backend {
            status: status.as_u16(),
            body,
        })
    }

    pub(crate) async fn insert(
        &self,
        collection: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize> {
        let Some(first) = chunks.first() else {
            return Ok(0);
        };
        self.ensure_collection(collection, first.embedding.len())
            .await?;
        let url = format!("{}/_bulk?refresh=true", self.base_url);
        let response = self
            .request(self.http.post(url))
            .header("content-type", "application/x-ndjson")
            .body(bulk_body(collection, chunks)?)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IndexError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: BulkResponse = serde_json::from_str(&body)?;
        if parsed.errors {
            return Err(IndexError::Backend {
                status: status.as_u16(),
                body: first_bulk_error(&parsed.items).unwrap_or(body),
            });
        }
        Ok(chunks.len())
    }

    pub async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/{collection}/_search", self.base_url);
        let response = self
            .request(self.http.post(url))
            .json(&knn_query(query_embedding, k, filter))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IndexError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        parse_hits(&body)
    }
}

/// kNN mapping compatible with documents written by LangChain's
/// `OpenSearchVectorSearch` (`vector_field`, `text`, `metadata`). The lucene
/// engine is used so term filters apply inside the kNN search.
pub fn index_mapping(dimensions: usize) -> Value {
    json!({
        "settings": { "index": { "knn": true } },
        "mappings": {
            "properties": {
                VECTOR_FIELD: {
                    "type": "knn_vector",
                    "dimension": dimensions,
                    "method": {
                        "name": "hnsw",
                        "space_type": "l2",
                        "engine": "lucene"
                    }
                },
                TEXT_FIELD: { "type": "text" },
                METADATA_FIELD: {
                    "properties": {
                        "session_id": { "type": "keyword" },
                        "standard_name": { "type": "keyword" },
                        "source_type": { "type": "keyword" },
                        "source_file": { "type": "keyword" },
                        "page": { "type": "integer" }
                    }
                }
            }
        }
    })
}

pub fn knn_query(vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Value {
    let mut knn = json!({ "vector": vector, "k": k });
    if let Some(filter) = filter {
        knn["filter"] = json!({
            "term": { format!("{METADATA_FIELD}.{}", filter.field): filter.value }
        });
    }
    json!({
        "size": k,
        "_source": [TEXT_FIELD, METADATA_FIELD],
        "query": { "knn": { VECTOR_FIELD: knn } }
    })
}

pub(crate) fn bulk_body(collection: &str, chunks: &[EmbeddedChunk]) -> Result<String> {
    let mut body = String::new();
    for item in chunks {
        let action = json!({ "index": { "_index": collection, "_id": item.chunk.id } });
        let source = json!({
            VECTOR_FIELD: item.embedding,
            TEXT_FIELD: item.chunk.text,
            METADATA_FIELD: item.chunk.metadata,
        });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source)?);
        body.push('\n');
    }
    Ok(body)
}

pub fn parse_hits(body: &str) -> Result<Vec<SearchHit>> {
    let parsed: SearchResponse = serde_json::from_str(body)?;
    Ok(parsed
        .hits
        .hits
        .into_iter()
        .map(|hit| SearchHit {
            id: hit.id,
            text: hit.source.text,
            metadata: hit.source.metadata,
            score: hit.score.unwrap_or(0.0),
        })
        .collect())
}

fn first_bulk_error(items: &[Value]) -> Option<String> {
    items.iter().find_map(|item| {
        item.get("index")
            .and_then(|op| op.get("error"))
            .map(|err| err.to_string())
    })
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Deserialize)]
struct HitSource {
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: ChunkMetadata,
}
