use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use auditrag_core::{extract_context, load_document, stable_chunk_id, DocumentKind, PageChunk};
use auditrag_index::{
    ChunkInsert, ChunkMetadata, EmbeddingClient, IndexBackend, LocalIndex, MetadataFilter,
    OpenSearchIndex, VectorIndex,
};
use auditrag_llm::{LlmClient, LlmRequest};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, IndexSettings, RETRIEVAL_TOP_K};
use crate::error::{RagError, Result};
use crate::history::{ChatMessage, HistoryStore};
use crate::prompt::{
    compose_excel_prompt, compose_prompt, format_history, render_standard_hit, select_template,
    PromptTemplate,
};
use crate::sanitize::finalize_response;

const DEFAULT_EXCEL_QUERY: &str = "ESG disclosure requirements and reported metrics";
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Content type is not a PDF or workbook; nothing was read.
    Rejected { content_type: String },
    Indexed { chunks: usize },
    /// Extraction or indexing failed; details are in the log.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub answer: String,
    pub template: Option<PromptTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcelOutcome {
    Rejected { content_type: String },
    Answered(ChatOutcome),
}

/// Request orchestration shared by every HTTP handler.
#[derive(Clone)]
pub struct RagService {
    config: Arc<AppConfig>,
    index: VectorIndex,
    llm: Option<LlmClient>,
    history: HistoryStore,
}

impl RagService {
    pub fn new(
        config: Arc<AppConfig>,
        index: VectorIndex,
        llm: Option<LlmClient>,
        history: HistoryStore,
    ) -> Self {
        Self {
            config,
            index,
            llm,
            history,
        }
    }

    /// Wires clients from configuration. Nothing is contacted here; an
    /// unreachable index or model only shows up on first use.
    pub fn from_config(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let index = build_index(&config)?;
        let llm = config
            .llm
            .as_ref()
            .map(LlmClient::new)
            .transpose()
            .context("failed to build completion client")?;
        let history = HistoryStore::new(&config.history_db);
        Ok(Self::new(config, index, llm, history))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn history_store(&self) -> &HistoryStore {
        &self.history
    }

    /// Pings the configured index once. An unreachable index only logs a
    /// warning; searches degrade to empty results until it recovers.
    pub async fn index_reachable(&self) -> bool {
        if !self.index.is_configured() {
            return false;
        }
        let reachable = self.index.ping().await;
        if !reachable {
            warn!(
                backend = self.index.backend_name(),
                "vector index unreachable; searches return no context until it recovers"
            );
        }
        reachable
    }

    pub async fn upload(
        &self,
        session_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> UploadOutcome {
        let Some(kind) = DocumentKind::from_content_type(content_type) else {
            return UploadOutcome::Rejected {
                content_type: content_type.to_string(),
            };
        };
        match self.index_upload(session_id, file_name, kind, bytes).await {
            Ok(chunks) => {
                info!(session_id, file = file_name, chunks, "document indexed");
                UploadOutcome::Indexed { chunks }
            }
            Err(err) => {
                error!(session_id, file = file_name, error = %format!("{err:#}"), "document processing failed");
                UploadOutcome::Failed
            }
        }
    }

    async fn index_upload(
        &self,
        session_id: &str,
        file_name: &str,
        kind: DocumentKind,
        bytes: Vec<u8>,
    ) -> anyhow::Result<usize> {
        if !self.index.is_configured() {
            return Err(anyhow!("vector index unavailable"));
        }
        let chunking = self.config.retrieval.chunk_config();
        let pages: Vec<PageChunk> =
            task::spawn_blocking(move || load_document(kind, &bytes, &chunking)).await??;
        let source = format!("{session_id}/{file_name}");
        let chunks = pages
            .into_iter()
            .map(|page| ChunkInsert {
                id: stable_chunk_id(&source, page.page, page.chunk.index),
                text: page.chunk.text,
                metadata: ChunkMetadata {
                    session_id: Some(session_id.to_string()),
                    source_file: file_name.to_string(),
                    page: page.page,
                    ..Default::default()
                },
            })
            .collect::<Vec<_>>();
        Ok(self
            .index
            .insert(&self.config.collections.user, &chunks)
            .await?)
    }

    async fn retrieve(&self, session_id: &str, query: &str) -> (Vec<String>, Vec<String>) {
        let k = RETRIEVAL_TOP_K;
        let filter = MetadataFilter::session(session_id);
        let (user_hits, standard_hits) = tokio::join!(
            self.index
                .search(&self.config.collections.user, query, k, Some(&filter)),
            self.index
                .search(&self.config.collections.standards, query, k, None),
        );
        debug!(
            session_id,
            user_hits = user_hits.len(),
            standard_hits = standard_hits.len(),
            "retrieval finished"
        );
        (
            user_hits.into_iter().map(|hit| hit.text).collect(),
            standard_hits.iter().map(render_standard_hit).collect(),
        )
    }

    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatOutcome> {
        let (user_context, standards_context) = self.retrieve(session_id, message).await;
        if user_context.is_empty() && standards_context.is_empty() {
            info!(session_id, "no context found; skipping completion");
            return Ok(ChatOutcome {
                answer: format!("No relevant context was found for session '{session_id}'."),
                template: None,
            });
        }

        let recent = self
            .read_history(session_id, Some(self.config.retrieval.history_limit))
            .await?;
        let template = select_template(message);
        let prompt = compose_prompt(
            message,
            &user_context,
            &standards_context,
            &format_history(&recent),
        );
        let answer = self.complete(template, prompt).await?;
        self.persist_turn(session_id, message, &answer).await?;
        Ok(ChatOutcome {
            answer,
            template: Some(template),
        })
    }

    /// Answers a question about an uploaded workbook without indexing it.
    pub async fn compare_excel(
        &self,
        session_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        message: Option<&str>,
    ) -> Result<ExcelOutcome> {
        let kind = match DocumentKind::from_content_type(content_type) {
            Some(kind) if kind.is_spreadsheet() => kind,
            _ => {
                return Ok(ExcelOutcome::Rejected {
                    content_type: content_type.to_string(),
                })
            }
        };
        let excel_context = task::spawn_blocking(move || extract_context(kind, &bytes)).await??;
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        let query = message.unwrap_or(DEFAULT_EXCEL_QUERY);
        let standards_context = self
            .index
            .search(
                &self.config.collections.standards,
                query,
                RETRIEVAL_TOP_K,
                None,
            )
            .await
            .iter()
            .map(render_standard_hit)
            .collect::<Vec<_>>();

        let user_turn = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Gap analysis of workbook '{file_name}' against the standards base"));
        let template = PromptTemplate::GapAnalysis;
        let prompt = compose_excel_prompt(
            &user_turn,
            &excel_context,
            &standards_context,
            self.config.retrieval.excel_context_chars,
        );
        let answer = self.complete(template, prompt).await?;
        self.persist_turn(session_id, &user_turn, &answer).await?;
        Ok(ExcelOutcome::Answered(ChatOutcome {
            answer,
            template: Some(template),
        }))
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.read_history(session_id, None).await
    }

    pub async fn reset(&self, session_id: &str) -> Result<usize> {
        let store = self.history.clone();
        let session = session_id.to_string();
        let deleted = task::spawn_blocking(move || store.clear(&session))
            .await?
            .map_err(RagError::History)?;
        info!(session_id, deleted, "chat history cleared");
        Ok(deleted)
    }

    async fn complete(&self, template: PromptTemplate, prompt: String) -> Result<String> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| RagError::Completion(anyhow!("completion model is not configured")))?;
        let request = LlmRequest {
            system: Some(template.system_instruction().to_string()),
            user: prompt,
        };
        let response = llm.complete(&request).await.map_err(RagError::Completion)?;
        debug!(
            template = template.as_str(),
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "completion received"
        );
        Ok(finalize_response(template, &response.content))
    }

    async fn read_history(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        let store = self.history.clone();
        let session = session_id.to_string();
        task::spawn_blocking(move || store.read(&session, limit))
            .await?
            .map_err(RagError::History)
    }

    async fn persist_turn(&self, session_id: &str, user: &str, ai: &str) -> Result<()> {
        let store = self.history.clone();
        let (session, user, ai) = (session_id.to_string(), user.to_string(), ai.to_string());
        task::spawn_blocking(move || store.append_turn(&session, &user, &ai))
            .await?
            .map_err(|err| {
                warn!(error = %format!("{err:#}"), "answer produced but history write failed");
                RagError::History(err)
            })
    }
}

pub fn build_index(config: &AppConfig) -> anyhow::Result<VectorIndex> {
    let Some(embedding) = &config.embedding else {
        return Ok(VectorIndex::unavailable());
    };
    let backend = match &config.index {
        IndexSettings::Disabled { .. } => return Ok(VectorIndex::unavailable()),
        IndexSettings::OpenSearch(settings) => IndexBackend::OpenSearch(
            OpenSearchIndex::new(settings).context("failed to build opensearch client")?,
        ),
        IndexSettings::Local { path } => IndexBackend::Local(
            LocalIndex::open(path)
                .with_context(|| format!("failed to open local index {}", path.display()))?,
        ),
    };
    let embeddings = EmbeddingClient::new(embedding, EMBEDDING_TIMEOUT)
        .context("failed to build embedding client")?;
    Ok(VectorIndex::new(backend, embeddings))
}
