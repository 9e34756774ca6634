pub mod config;
pub mod error;
pub mod history;
pub mod prompt;
pub mod sanitize;
pub mod service;
pub mod standards;

pub use auditrag_index::{IndexBackend, VectorIndex};
pub use auditrag_llm::{LlmClient, LlmConfig, LlmProvider, LlmRequest, LlmResponse};
pub use config::{AppConfig, CollectionsConfig, IndexSettings, RetrievalConfig, RETRIEVAL_TOP_K};
pub use error::{RagError, Result};
pub use history::{ChatMessage, HistoryStore, Role};
pub use prompt::{
    compose_excel_prompt, compose_prompt, format_history, select_template, PromptTemplate,
};
pub use sanitize::{finalize_response, sanitize_response};
pub use service::{build_index, ChatOutcome, ExcelOutcome, RagService, UploadOutcome};
pub use standards::{ingest_standards, IngestReport};
