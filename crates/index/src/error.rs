use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector index is not configured or unreachable")]
    Unavailable,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("opensearch returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("invalid stored embedding")]
    InvalidEmbedding,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, IndexError>;
