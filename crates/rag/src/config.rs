use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use auditrag_core::ChunkConfig;
use auditrag_index::{EmbeddingConfig, OpenSearchConfig};
use auditrag_llm::{LlmConfig, LlmProvider};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_CONFIG_FILE: &str = "auditrag.toml";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_OPENSEARCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Passages retrieved per collection for every question.
pub const RETRIEVAL_TOP_K: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub history_limit: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub excel_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            history_limit: 3,
            chunk_size: 2000,
            chunk_overlap: 200,
            excel_context_chars: 30_000,
        }
    }
}

impl RetrievalConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    pub user: String,
    pub standards: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            user: "rag_knowledge_base".to_string(),
            standards: "esg_standards".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    retrieval: RetrievalConfig,
    #[serde(default)]
    collections: CollectionsConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexSettings {
    OpenSearch(OpenSearchConfig),
    Local { path: PathBuf },
    Disabled { reason: String },
}

/// Process-wide settings, read once at startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub retrieval: RetrievalConfig,
    pub collections: CollectionsConfig,
    pub index: IndexSettings,
    pub embedding: Option<EmbeddingConfig>,
    pub llm: Option<LlmConfig>,
    pub history_db: PathBuf,
    pub standards_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Missing
    /// credentials never fail here; the affected component is disabled and
    /// a warning is logged.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let file = match var("AUDITRAG_CONFIG") {
            Some(path) => load_file(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                load_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => FileConfig::default(),
        };
        if file.retrieval.chunk_size == 0 {
            return Err(anyhow!("retrieval.chunk_size must be positive"));
        }

        let gemini_key = var("GEMINI_API_KEY");
        let embedding = embedding_settings(&var, gemini_key.as_deref())?;
        let index = match &embedding {
            None => IndexSettings::Disabled {
                reason: "no embedding model configured".to_string(),
            },
            Some(_) => index_settings(&var)?,
        };
        if let IndexSettings::Disabled { reason } = &index {
            warn!(reason = %reason, "vector index disabled; searches return no context");
        }
        let llm = llm_settings(&var, gemini_key)?;
        if llm.is_none() {
            warn!("completion model not configured; chat requests will fail");
        }

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            retrieval: file.retrieval,
            collections: file.collections,
            index,
            embedding,
            llm,
            history_db: var("HISTORY_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("chat_history.sqlite")),
            standards_dir: var("STANDARDS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("standards_data")),
        })
    }
}

fn load_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn embedding_settings(
    var: &impl Fn(&str) -> Option<String>,
    gemini_key: Option<&str>,
) -> Result<Option<EmbeddingConfig>> {
    let provider = var("EMBEDDING_PROVIDER").unwrap_or_else(|| "gemini".to_string());
    match provider.to_lowercase().as_str() {
        "gemini" | "google" => Ok(gemini_key.map(|key| EmbeddingConfig::Gemini {
            api_key: key.to_string(),
            model: var("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })),
        "hash" => Ok(Some(EmbeddingConfig::Hash {
            dimensions: parse_var(var, "EMBEDDING_DIMENSIONS")?.unwrap_or(256),
        })),
        other => Err(anyhow!("unknown embedding provider {other}")),
    }
}

fn index_settings(var: &impl Fn(&str) -> Option<String>) -> Result<IndexSettings> {
    let backend = var("INDEX_BACKEND").unwrap_or_else(|| "opensearch".to_string());
    match backend.to_lowercase().as_str() {
        "opensearch" => {
            let port = var("OPENSEARCH_PORT").and_then(|p| p.parse::<u16>().ok());
            match (
                var("OPENSEARCH_HOSTS"),
                port,
                var("OPENSEARCH_USER"),
                var("OPENSEARCH_PASSWORD"),
            ) {
                (Some(host), Some(port), Some(user), Some(password)) => {
                    Ok(IndexSettings::OpenSearch(OpenSearchConfig {
                        host,
                        port,
                        user,
                        password,
                        verify_certs: parse_bool(var("OPENSEARCH_VERIFY_CERTS")),
                        timeout: Duration::from_secs(DEFAULT_OPENSEARCH_TIMEOUT_SECS),
                    }))
                }
                _ => Ok(IndexSettings::Disabled {
                    reason: "OPENSEARCH_HOSTS, OPENSEARCH_PORT, OPENSEARCH_USER or OPENSEARCH_PASSWORD missing"
                        .to_string(),
                }),
            }
        }
        "local" => Ok(IndexSettings::Local {
            path: var("LOCAL_INDEX_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("vector_index.sqlite")),
        }),
        "none" | "disabled" => Ok(IndexSettings::Disabled {
            reason: "INDEX_BACKEND=none".to_string(),
        }),
        other => Err(anyhow!("unknown index backend {other}")),
    }
}

fn llm_settings(
    var: &impl Fn(&str) -> Option<String>,
    gemini_key: Option<String>,
) -> Result<Option<LlmConfig>> {
    let provider_name = var("LLM_PROVIDER").unwrap_or_else(|| "gemini".to_string());
    let provider = LlmProvider::parse(&provider_name)
        .ok_or_else(|| anyhow!("unknown llm provider {provider_name}"))?;
    let api_key = match provider {
        LlmProvider::Gemini => gemini_key,
        LlmProvider::OpenAi => var("OPENAI_API_KEY"),
        LlmProvider::Local => None,
    };
    if provider != LlmProvider::Local && api_key.is_none() {
        return Ok(None);
    }
    let timeout_secs = parse_var(var, "LLM_TIMEOUT_SECS")?.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS);
    Ok(Some(LlmConfig {
        provider,
        model: var("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
        api_key,
        base_url: var("LLM_BASE_URL"),
        temperature: 0.0,
        timeout: Duration::from_secs(timeout_secs),
    }))
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| anyhow!("invalid {key}={raw}: {err}"))
        })
        .transpose()
}

fn parse_bool(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
