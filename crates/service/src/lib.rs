use std::sync::Arc;

use auditrag_rag::{ChatMessage, ExcelOutcome, RagError, RagService, UploadOutcome};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DETAIL_LIMIT: usize = 200;

pub struct AppState {
    pub rag: RagService,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/upload-document", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/history/:session_id", get(handle_history))
        .route("/reset", post(handle_reset))
        .route("/compare-excel", post(handle_compare_excel))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub ai_response: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub session_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub message: String,
    pub session_id: String,
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub session_id: String,
    pub chunks_indexed: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
}

impl From<ChatMessage> for HistoryEntry {
    fn from(message: ChatMessage) -> Self {
        Self {
            kind: message.role.as_str().to_string(),
            content: message.content,
        }
    }
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({ "message": "RAG service is running." }))
}

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_form(multipart.map_err(AppError::bad_request)?).await?;
    let session_id = form.session_id()?;
    let file = form.file()?;
    match state
        .rag
        .upload(&session_id, &file.name, &file.content_type, file.data)
        .await
    {
        UploadOutcome::Indexed { chunks } => Ok(Json(UploadResponse {
            message: format!(
                "File '{}' was processed and indexed for session {session_id}.",
                file.name
            ),
            session_id,
            chunks_indexed: chunks,
        })),
        UploadOutcome::Rejected { content_type } => Err(AppError::bad_request(format!(
            "Only PDF or Excel documents are accepted (got '{content_type}')."
        ))),
        UploadOutcome::Failed => Err(AppError::Processing(
            "Document processing failed. Check the vector index connection and the API key."
                .to_string(),
        )),
    }
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(body) = payload.map_err(AppError::bad_request)?;
    let outcome = state.rag.chat(&body.session_id, &body.message).await?;
    Ok(Json(ChatResponse {
        session_id: body.session_id,
        ai_response: outcome.answer,
    }))
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state.rag.history(&session_id).await?;
    Ok(Json(HistoryResponse {
        session_id,
        history: messages.into_iter().map(HistoryEntry::from).collect(),
    }))
}

async fn handle_reset(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, AppError> {
    let Json(body) = payload.map_err(AppError::bad_request)?;
    let deleted = state.rag.reset(&body.session_id).await?;
    Ok(Json(ResetResponse {
        message: format!("Chat history cleared for session {}.", body.session_id),
        session_id: body.session_id,
        deleted,
    }))
}

async fn handle_compare_excel(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let form = read_form(multipart.map_err(AppError::bad_request)?).await?;
    let session_id = form.session_id()?;
    let message = form.message.clone();
    let file = form.file()?;
    let outcome = state
        .rag
        .compare_excel(
            &session_id,
            &file.name,
            &file.content_type,
            file.data,
            message.as_deref(),
        )
        .await?;
    match outcome {
        ExcelOutcome::Answered(chat) => Ok(Json(ChatResponse {
            session_id,
            ai_response: chat.answer,
        })),
        ExcelOutcome::Rejected { content_type } => Err(AppError::bad_request(format!(
            "Only Excel workbooks are accepted (got '{content_type}')."
        ))),
    }
}

struct UploadedFile {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    session_id: Option<String>,
    message: Option<String>,
    file: Option<UploadedFile>,
}

impl UploadForm {
    fn session_id(&self) -> Result<String, AppError> {
        self.session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("missing form field 'session_id'"))
    }

    fn file(self) -> Result<UploadedFile, AppError> {
        self.file
            .ok_or_else(|| AppError::bad_request("missing form field 'file'"))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::bad_request)?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(AppError::bad_request)?;
                form.file = Some(UploadedFile {
                    name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            Some("session_id") => {
                form.session_id = Some(field.text().await.map_err(AppError::bad_request)?);
            }
            Some("message") => {
                form.message = Some(field.text().await.map_err(AppError::bad_request)?);
            }
            _ => {}
        }
    }
    Ok(form)
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Processing(String),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        error!(kind = err.kind(), error = %err, "request failed");
        let message = err.to_string();
        let truncated: String = message.chars().take(DETAIL_LIMIT).collect();
        Self::Processing(format!(
            "RAG processing failed ({}): {truncated}",
            err.kind()
        ))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Processing(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
