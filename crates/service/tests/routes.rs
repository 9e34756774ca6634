use std::path::Path;
use std::sync::Arc;

use auditrag_index::{ChunkInsert, ChunkMetadata, EmbeddingClient, IndexBackend, LocalIndex, VectorIndex};
use auditrag_rag::{
    AppConfig, CollectionsConfig, HistoryStore, IndexSettings, LlmClient, LlmConfig, RagService,
    RetrievalConfig,
};
use auditrag_service::{create_router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "auditrag-test-boundary";
const COMPANY_REPORT_PDF: &[u8] = include_bytes!("fixtures/company_report.pdf");

struct TestApp {
    _dir: TempDir,
    router: Router,
    rag: RagService,
    local: LocalIndex,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config(dir.path()));
    let local = LocalIndex::open(dir.path().join("index.sqlite")).unwrap();
    let index = VectorIndex::new(IndexBackend::Local(local.clone()), EmbeddingClient::hash());
    let llm = LlmClient::new(&LlmConfig::local()).unwrap();
    let history = HistoryStore::open(&config.history_db).unwrap();
    let rag = RagService::new(config, index, Some(llm), history);
    TestApp {
        router: create_router(Arc::new(AppState { rag: rag.clone() })),
        rag,
        local,
        _dir: dir,
    }
}

fn config(dir: &Path) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        retrieval: RetrievalConfig::default(),
        collections: CollectionsConfig::default(),
        index: IndexSettings::Local {
            path: dir.join("index.sqlite"),
        },
        embedding: None,
        llm: Some(LlmConfig::local()),
        history_db: dir.join("history.sqlite"),
        standards_dir: dir.join("standards"),
    }
}

async fn seed(app: &TestApp) {
    let index = app.rag.index();
    index
        .insert(
            "rag_knowledge_base",
            &[ChunkInsert {
                id: "u1".into(),
                text: "Water withdrawal was 1200 megaliters in 2023".into(),
                metadata: ChunkMetadata {
                    session_id: Some("alpha".into()),
                    source_file: "report.pdf".into(),
                    page: 3,
                    ..Default::default()
                },
            }],
        )
        .await
        .unwrap();
    index
        .insert(
            "esg_standards",
            &[ChunkInsert {
                id: "s1".into(),
                text: "Report total water withdrawal in megaliters".into(),
                metadata: ChunkMetadata {
                    standard_name: Some("GRI 303".into()),
                    source_type: Some("ESG_Standard".into()),
                    source_file: "GRI 303.pdf".into(),
                    page: 1,
                    ..Default::default()
                },
            }],
        )
        .await
        .unwrap();
}

fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Request::builder()
        .method("POST")
        .uri("/upload-document")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn root_reports_running() {
    let app = test_app();
    let (status, body) = send(&app.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "RAG service is running.");
}

#[tokio::test]
async fn plain_text_upload_is_rejected() {
    let app = test_app();
    let request = multipart(
        &[("session_id", "alpha")],
        Some(("notes.txt", "text/plain", b"Scope 1 emissions")),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("text/plain"));
    assert_eq!(app.local.count("rag_knowledge_base").unwrap(), 0);
}

#[tokio::test]
async fn upload_without_session_is_a_bad_request() {
    let app = test_app();
    let request = multipart(&[], Some(("report.pdf", "application/pdf", b"%PDF-1.4")));
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "missing form field 'session_id'");
}

#[tokio::test]
async fn pdf_upload_is_indexed_and_answerable() {
    let app = test_app();
    let request = multipart(
        &[("session_id", "alpha")],
        Some(("company_report.pdf", "application/pdf", COMPANY_REPORT_PDF)),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "alpha");
    assert_eq!(body["chunks_indexed"], 1);
    assert!(body["message"].as_str().unwrap().contains("company_report.pdf"));
    assert_eq!(app.local.count("rag_knowledge_base").unwrap(), 1);

    let (status, body) = send(
        &app.router,
        post_json(
            "/chat",
            json!({ "session_id": "alpha", "message": "What were our Scope 1 emissions?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["ai_response"].as_str().unwrap().contains("5400"));
}

#[tokio::test]
async fn broken_pdf_upload_reports_processing_failure() {
    let app = test_app();
    let request = multipart(
        &[("session_id", "alpha")],
        Some(("report.pdf", "application/pdf", b"definitely not a pdf")),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().starts_with("Document processing failed"));
}

#[tokio::test]
async fn chat_history_and_reset_round() {
    let app = test_app();
    seed(&app).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/chat",
            json!({ "session_id": "alpha", "message": "How much water did we withdraw?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "alpha");
    let answer = body["ai_response"].as_str().unwrap().to_string();
    assert!(answer.starts_with("Answer to: How much water did we withdraw?"));

    let (status, body) = send(&app.router, get("/history/alpha")).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["type"], "human");
    assert_eq!(history[0]["content"], "How much water did we withdraw?");
    assert_eq!(history[1]["type"], "ai");
    assert_eq!(history[1]["content"], answer.as_str());

    let (status, body) = send(
        &app.router,
        post_json("/reset", json!({ "session_id": "alpha", "message": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);

    let (_, body) = send(&app.router, get("/history/alpha")).await;
    assert!(body["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn chat_without_context_returns_fixed_reply() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        post_json("/chat", json!({ "session_id": "ghost", "message": "anything?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["ai_response"],
        "No relevant context was found for session 'ghost'."
    );
    let (_, body) = send(&app.router, get("/history/ghost")).await;
    assert!(body["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"session_id\": "))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn compare_excel_rejects_non_workbooks() {
    let app = test_app();
    let mut request = multipart(
        &[("session_id", "alpha")],
        Some(("report.pdf", "application/pdf", b"%PDF-1.4")),
    );
    *request.uri_mut() = "/compare-excel".parse().unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Excel"));
}
