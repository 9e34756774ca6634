use auditrag_core::strip_emphasis;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::prompt::PromptTemplate;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static PERIOD_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("period regex"));

/// Flattens a model answer to a single line of plain text: emphasis markers
/// become spaces, whitespace runs collapse to one space and runs of periods
/// collapse to one.
pub fn sanitize_response(raw: &str) -> String {
    let text = strip_emphasis(raw);
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = PERIOD_RUN.replace_all(&text, ".");
    text.trim().to_string()
}

/// Markdown tables would be destroyed by sanitizing, so they pass through.
pub fn finalize_response(template: PromptTemplate, raw: &str) -> String {
    if template.requests_table() {
        raw.to_string()
    } else {
        sanitize_response(raw)
    }
}
