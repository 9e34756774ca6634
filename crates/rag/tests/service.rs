use std::path::Path;
use std::sync::Arc;

use auditrag_index::{
    ChunkInsert, ChunkMetadata, EmbeddingClient, IndexBackend, LocalIndex, MetadataFilter,
    VectorIndex,
};
use auditrag_rag::{
    ingest_standards, AppConfig, ChatMessage, CollectionsConfig, ExcelOutcome, HistoryStore,
    IndexSettings, IngestReport, LlmClient, LlmConfig, PromptTemplate, RagService,
    RetrievalConfig, UploadOutcome,
};
use tempfile::TempDir;

const COMPANY_REPORT_PDF: &[u8] = include_bytes!("fixtures/company_report.pdf");
const GRI_305_PDF: &[u8] = include_bytes!("fixtures/gri_305.pdf");
const EMISSIONS_XLSX: &[u8] = include_bytes!("fixtures/emissions.xlsx");
const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

struct Harness {
    _dir: TempDir,
    service: RagService,
    local: LocalIndex,
}

fn config(dir: &Path, retrieval: RetrievalConfig) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        retrieval,
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

fn harness(with_llm: bool) -> Harness {
    harness_with(with_llm, RetrievalConfig::default())
}

fn harness_with(with_llm: bool, retrieval: RetrievalConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config(dir.path(), retrieval));
    let local = LocalIndex::open(dir.path().join("index.sqlite")).unwrap();
    let index = VectorIndex::new(IndexBackend::Local(local.clone()), EmbeddingClient::hash());
    let llm = with_llm.then(|| LlmClient::new(&LlmConfig::local()).unwrap());
    let history = HistoryStore::open(&config.history_db).unwrap();
    Harness {
        service: RagService::new(config, index, llm, history),
        local,
        _dir: dir,
    }
}

fn user_chunk(id: &str, session: &str, text: &str) -> ChunkInsert {
    ChunkInsert {
        id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            session_id: Some(session.to_string()),
            source_file: "report.pdf".to_string(),
            page: 1,
            ..Default::default()
        },
    }
}

fn standard_chunk(id: &str, name: &str, text: &str) -> ChunkInsert {
    ChunkInsert {
        id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            standard_name: Some(name.to_string()),
            source_type: Some("ESG_Standard".to_string()),
            source_file: format!("{name}.pdf"),
            page: 1,
            ..Default::default()
        },
    }
}

async fn seed(h: &Harness) {
    let index = h.service.index();
    index
        .insert(
            "rag_knowledge_base",
            &[user_chunk(
                "u1",
                "alpha",
                "Scope 1 emissions were 5400 tCO2e in 2023",
            )],
        )
        .await
        .unwrap();
    index
        .insert(
            "esg_standards",
            &[standard_chunk(
                "s1",
                "GRI 305",
                "Report gross direct Scope 1 emissions in tCO2e",
            )],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn chat_uses_both_contexts_and_records_the_turn() {
    let h = harness(true);
    seed(&h).await;

    let outcome = h
        .service
        .chat("alpha", "What were our Scope 1 emissions?")
        .await
        .unwrap();
    assert_eq!(outcome.template, Some(PromptTemplate::Comparison));
    assert!(outcome
        .answer
        .starts_with("Answer to: What were our Scope 1 emissions?"));
    assert!(outcome.answer.contains("5400 tCO2e"));
    // plain-text answers are flattened to one line
    assert!(!outcome.answer.contains('\n'));

    let history = h.service.history("alpha").await.unwrap();
    assert_eq!(
        history,
        vec![
            ChatMessage::human("What were our Scope 1 emissions?"),
            ChatMessage::ai(outcome.answer.clone()),
        ]
    );
}

#[tokio::test]
async fn table_answers_are_not_sanitized() {
    let h = harness(true);
    seed(&h).await;

    let outcome = h
        .service
        .chat("alpha", "Which Scope 1 disclosures are missing?")
        .await
        .unwrap();
    assert_eq!(outcome.template, Some(PromptTemplate::GapAnalysis));
    assert!(outcome.answer.contains("\nBased on: "));
}

#[tokio::test]
async fn other_sessions_only_see_the_standards() {
    let h = harness(true);
    seed(&h).await;

    let outcome = h
        .service
        .chat("beta", "What were our Scope 1 emissions?")
        .await
        .unwrap();
    assert!(!outcome.answer.contains("5400"));
    assert!(outcome.answer.contains("No relevant information found in the user document."));
}

#[tokio::test]
async fn empty_retrieval_skips_the_model_and_history() {
    let h = harness(false);

    let outcome = h.service.chat("alpha", "anything at all").await.unwrap();
    assert_eq!(outcome.template, None);
    assert!(outcome.answer.contains("'alpha'"));
    assert!(h.service.history("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_model_fails_without_persisting() {
    let h = harness(false);
    seed(&h).await;

    let err = h
        .service
        .chat("alpha", "What were our Scope 1 emissions?")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Completion");
    assert!(h.service.history("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_then_history_is_empty() {
    let h = harness(true);
    seed(&h).await;
    h.service
        .chat("alpha", "What were our Scope 1 emissions?")
        .await
        .unwrap();

    assert_eq!(h.service.reset("alpha").await.unwrap(), 2);
    assert!(h.service.history("alpha").await.unwrap().is_empty());
    assert_eq!(h.service.reset("alpha").await.unwrap(), 0);
}

#[tokio::test]
async fn unsupported_upload_is_rejected_before_indexing() {
    let h = harness(true);

    let outcome = h
        .service
        .upload("alpha", "notes.txt", "text/plain", b"Scope 1".to_vec())
        .await;
    assert_eq!(
        outcome,
        UploadOutcome::Rejected {
            content_type: "text/plain".to_string()
        }
    );
    assert_eq!(h.local.count("rag_knowledge_base").unwrap(), 0);
}

#[tokio::test]
async fn unreadable_pdf_upload_fails() {
    let h = harness(true);

    let outcome = h
        .service
        .upload(
            "alpha",
            "broken.pdf",
            "application/pdf",
            b"this is not a pdf".to_vec(),
        )
        .await;
    assert_eq!(outcome, UploadOutcome::Failed);
    assert_eq!(h.local.count("rag_knowledge_base").unwrap(), 0);
}

#[tokio::test]
async fn compare_excel_only_accepts_workbooks() {
    let h = harness(true);

    let outcome = h
        .service
        .compare_excel("alpha", "report.pdf", "application/pdf", b"%PDF".to_vec(), None)
        .await
        .unwrap();
    assert!(matches!(outcome, ExcelOutcome::Rejected { .. }));

    let err = h
        .service
        .compare_excel(
            "alpha",
            "data.xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            b"garbage".to_vec(),
            Some("gap"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Extraction");
    assert!(h.service.history("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn standards_sweep_skips_existing_collection() {
    let h = harness(true);
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GRI 305.pdf"), b"not really a pdf").unwrap();
    let chunking = RetrievalConfig::default().chunk_config();

    let report = ingest_standards(h.service.index(), dir.path(), "esg_standards", &chunking).await;
    assert!(!report.skipped_existing);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "GRI 305.pdf");
    assert_eq!(report.total_chunks(), 0);

    seed(&h).await;
    let report = ingest_standards(h.service.index(), dir.path(), "esg_standards", &chunking).await;
    assert!(report.skipped_existing);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn standards_sweep_tolerates_missing_directory() {
    let h = harness(true);
    let chunking = RetrievalConfig::default().chunk_config();
    let report = ingest_standards(
        h.service.index(),
        Path::new("/nonexistent/standards"),
        "esg_standards",
        &chunking,
    )
    .await;
    assert_eq!(report, IngestReport::default());
}

#[tokio::test]
async fn uploaded_pdf_is_indexed_for_its_session_only() {
    let h = harness(true);
    assert!(h.service.index_reachable().await);

    let outcome = h
        .service
        .upload(
            "alpha",
            "company_report.pdf",
            "application/pdf",
            COMPANY_REPORT_PDF.to_vec(),
        )
        .await;
    assert_eq!(outcome, UploadOutcome::Indexed { chunks: 1 });
    assert_eq!(h.local.count("rag_knowledge_base").unwrap(), 1);

    let index = h.service.index();
    let hits = index
        .search(
            "rag_knowledge_base",
            "Scope 1 emissions",
            4,
            Some(&MetadataFilter::session("alpha")),
        )
        .await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("5400"));
    assert_eq!(hits[0].metadata.session_id.as_deref(), Some("alpha"));
    assert_eq!(hits[0].metadata.source_file, "company_report.pdf");
    assert_eq!(hits[0].metadata.page, 1);
    assert!(hits[0].metadata.standard_name.is_none());

    let other = index
        .search(
            "rag_knowledge_base",
            "Scope 1 emissions",
            4,
            Some(&MetadataFilter::session("beta")),
        )
        .await;
    assert!(other.is_empty());

    let answer = h
        .service
        .chat("alpha", "What were our Scope 1 emissions?")
        .await
        .unwrap()
        .answer;
    assert!(answer.contains("5400"));
}

#[tokio::test]
async fn standards_sweep_indexes_pdfs_with_standard_metadata() {
    let h = harness(true);
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GRI 305.pdf"), GRI_305_PDF).unwrap();
    std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();
    let chunking = RetrievalConfig::default().chunk_config();

    let report = ingest_standards(h.service.index(), dir.path(), "esg_standards", &chunking).await;
    assert!(!report.skipped_existing);
    assert!(report.failed.is_empty());
    assert_eq!(report.indexed, vec![("GRI 305.pdf".to_string(), 1)]);

    let hits = h
        .service
        .index()
        .search("esg_standards", "gross direct Scope 1 GHG emissions", 4, None)
        .await;
    assert_eq!(hits.len(), 1);
    let meta = &hits[0].metadata;
    assert_eq!(meta.standard_name.as_deref(), Some("GRI 305"));
    assert_eq!(meta.source_type.as_deref(), Some("ESG_Standard"));
    assert_eq!(meta.source_file, "GRI 305.pdf");
    assert!(meta.session_id.is_none());
    assert!(hits[0].text.contains("Disclosure 305-1"));

    let again = ingest_standards(h.service.index(), dir.path(), "esg_standards", &chunking).await;
    assert!(again.skipped_existing);
    assert_eq!(h.local.count("esg_standards").unwrap(), 1);
}

#[tokio::test]
async fn standards_sweep_reads_nothing_without_an_index() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GRI 305.pdf"), GRI_305_PDF).unwrap();
    std::fs::write(dir.path().join("IFRS S2.pdf"), b"not a pdf").unwrap();
    let chunking = RetrievalConfig::default().chunk_config();

    let index = VectorIndex::unavailable();
    let report = ingest_standards(&index, dir.path(), "esg_standards", &chunking).await;
    assert_eq!(report, IngestReport::default());
}

#[tokio::test]
async fn compare_excel_answers_with_an_unsanitized_gap_table() {
    let h = harness(true);

    let outcome = h
        .service
        .compare_excel("alpha", "emissions.xlsx", XLSX, EMISSIONS_XLSX.to_vec(), None)
        .await
        .unwrap();
    let ExcelOutcome::Answered(chat) = outcome else {
        panic!("workbook was rejected");
    };
    assert_eq!(chat.template, Some(PromptTemplate::GapAnalysis));
    let user_turn = "Gap analysis of workbook 'emissions.xlsx' against the standards base";
    assert!(chat.answer.starts_with(&format!("Answer to: {user_turn}")));
    // table answers keep their line breaks
    assert!(chat.answer.contains("\nBased on: # Emissions (Sheet)"));
    assert!(chat.answer.contains("5400 tCO2e"));
    assert!(chat.answer.contains("1200 ML"));
    // nothing from the workbook is indexed
    assert_eq!(h.local.count("rag_knowledge_base").unwrap(), 0);

    let history = h.service.history("alpha").await.unwrap();
    assert_eq!(
        history,
        vec![
            ChatMessage::human(user_turn),
            ChatMessage::ai(chat.answer.clone()),
        ]
    );
}

#[tokio::test]
async fn compare_excel_cuts_the_workbook_context() {
    let h = harness_with(
        true,
        RetrievalConfig {
            excel_context_chars: 40,
            ..RetrievalConfig::default()
        },
    );

    let outcome = h
        .service
        .compare_excel(
            "alpha",
            "emissions.xlsx",
            XLSX,
            EMISSIONS_XLSX.to_vec(),
            Some("Which Scope 1 disclosures are missing?"),
        )
        .await
        .unwrap();
    let ExcelOutcome::Answered(chat) = outcome else {
        panic!("workbook was rejected");
    };
    assert!(chat
        .answer
        .ends_with("Based on: # Emissions (Sheet) ## Rows 1-2 | metr"));
    assert!(!chat.answer.contains("5400"));

    let history = h.service.history("alpha").await.unwrap();
    assert_eq!(
        history[0],
        ChatMessage::human("Which Scope 1 disclosures are missing?")
    );
}
