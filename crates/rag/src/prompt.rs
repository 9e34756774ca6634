use auditrag_index::SearchHit;

use crate::history::{ChatMessage, Role};

const GAP_KEYWORDS: &[&str] = &["çatışmazlıq", "tapılmadı", "gap", "missing"];
const PRECISION_KEYWORDS: &[&str] = &[
    "dəqiqliyi",
    "formatı",
    "rəqəmsal",
    "quote",
    "precision",
    "numeric",
];

const HISTORY_HEADER: &str = "--- PREVIOUS CONVERSATION ---";
const HISTORY_FOOTER: &str = "-----------------------------";
const NO_USER_CONTEXT: &str = "No relevant information found in the user document.";
const NO_STANDARDS_CONTEXT: &str = "No relevant information found in the standards base.";
const UNKNOWN_STANDARD: &str = "Unknown Standard";
const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    GapAnalysis,
    LineByLine,
    Comparison,
}

impl PromptTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptTemplate::GapAnalysis => "gap_analysis",
            PromptTemplate::LineByLine => "line_by_line",
            PromptTemplate::Comparison => "comparison",
        }
    }

    pub fn system_instruction(&self) -> &'static str {
        match self {
            PromptTemplate::GapAnalysis => {
                "You are a senior ESG auditor. Your main task is to compare every element \
                 required by the Standards (CONTEXT 2) against the Company Data (CONTEXT 1). \
                 List precisely the data points that CONTEXT 2 requires but that are missing \
                 from CONTEXT 1. Present the result as a Markdown table."
            }
            PromptTemplate::LineByLine => {
                "You are a precision analyst for SASB/ISSB standards. Based on the user's \
                 question, quote the exact line from CONTEXT 1 and check whether it meets the \
                 specific numeric or formatting requirements stated in CONTEXT 2. Answer with a \
                 Markdown table whose columns are [Required Standard], [Exact Quote From Company \
                 Text], [Compliance Status]."
            }
            PromptTemplate::Comparison => {
                "You are an expert quality-assurance auditor. Compare the given contexts and, \
                 taking the previous conversation into account, give a detailed answer in plain \
                 text in the language of the question."
            }
        }
    }

    /// Table answers are returned verbatim; everything else is sanitized.
    pub fn requests_table(&self) -> bool {
        matches!(self, PromptTemplate::GapAnalysis | PromptTemplate::LineByLine)
    }
}

/// Gap keywords win over precision keywords; anything else is a comparison.
pub fn select_template(query: &str) -> PromptTemplate {
    let lowered = query.to_lowercase();
    if GAP_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        PromptTemplate::GapAnalysis
    } else if PRECISION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        PromptTemplate::LineByLine
    } else {
        PromptTemplate::Comparison
    }
}

pub fn format_history(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut out = String::from(HISTORY_HEADER);
    out.push('\n');
    for message in messages {
        let label = match message.role {
            Role::Human => "HUMAN",
            Role::Ai => "AI",
        };
        out.push_str(&format!("[{label}]: {}\n", message.content));
    }
    out.push_str(HISTORY_FOOTER);
    out.push_str("\n\n");
    out
}

pub fn render_standard_hit(hit: &SearchHit) -> String {
    let name = hit
        .metadata
        .standard_name
        .as_deref()
        .unwrap_or(UNKNOWN_STANDARD);
    format!("[{name}]: {}", hit.text)
}

fn join_or(items: &[String], placeholder: &str) -> String {
    if items.is_empty() {
        placeholder.to_string()
    } else {
        items.join(CONTEXT_SEPARATOR)
    }
}

pub fn compose_prompt(
    query: &str,
    user_context: &[String],
    standards_context: &[String],
    history_block: &str,
) -> String {
    format!(
        "{history_block}Current question: {query}\n\n\
         CONTEXT 1 (company data / user file):\n{}\n\n\
         CONTEXT 2 (standards base):\n{}\n\n",
        join_or(user_context, NO_USER_CONTEXT),
        join_or(standards_context, NO_STANDARDS_CONTEXT),
    )
}

/// Prompt for comparing an uploaded workbook against the standards. The
/// workbook text is cut to `max_chars` characters.
pub fn compose_excel_prompt(
    message: &str,
    excel_context: &str,
    standards_context: &[String],
    max_chars: usize,
) -> String {
    let excel = truncate_chars(excel_context, max_chars);
    format!(
        "Current question: {message}\n\n\
         CONTEXT 1 (company data / user file):\n{excel}\n\n\
         CONTEXT 2 (standards base):\n{}\n\n",
        join_or(standards_context, NO_STANDARDS_CONTEXT),
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
