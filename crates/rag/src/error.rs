use thiserror::Error;

/// Failures surfaced by [`crate::RagService`]. Client mistakes (unsupported
/// upload types) are reported as outcomes, not errors.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("document extraction failed: {0}")]
    Extraction(#[from] auditrag_core::CoreError),
    #[error("completion failed: {0:#}")]
    Completion(anyhow::Error),
    #[error("chat history unavailable: {0:#}")]
    History(anyhow::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RagError {
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Extraction(_) => "Extraction",
            RagError::Completion(_) => "Completion",
            RagError::History(_) => "History",
            RagError::Task(_) => "Task",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
