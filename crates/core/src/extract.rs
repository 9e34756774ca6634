use std::io::{Cursor, Write};
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CoreError, Result};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLS_CONTENT_TYPE: &str = "application/vnd.ms-excel";

const ROW_CHUNK: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Xlsx,
    Xls,
}

impl DocumentKind {
    /// Maps a declared upload content type. Parameters such as `; charset=`
    /// are ignored.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            PDF_CONTENT_TYPE => Some(DocumentKind::Pdf),
            XLSX_CONTENT_TYPE => Some(DocumentKind::Xlsx),
            XLS_CONTENT_TYPE => Some(DocumentKind::Xls),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("pdf") => Some(DocumentKind::Pdf),
            Some("xlsx") => Some(DocumentKind::Xlsx),
            Some("xls") => Some(DocumentKind::Xls),
            _ => None,
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, DocumentKind::Xlsx | DocumentKind::Xls)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Xlsx => "xlsx",
            DocumentKind::Xls => "xls",
        }
    }
}

/// Raw text of one PDF page or one worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub label: Option<String>,
    pub text: String,
}

pub fn extract_pages(kind: DocumentKind, bytes: &[u8]) -> Result<Vec<PageText>> {
    match kind {
        DocumentKind::Pdf => pdf_to_pages(bytes),
        DocumentKind::Xlsx | DocumentKind::Xls => workbook_to_pages(bytes),
    }
}

fn pdf_to_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let mut tmp = NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    let pages = pdf_extract::extract_text_by_pages(tmp.path())
        .map_err(|e| CoreError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageText {
            page: idx as u32 + 1,
            label: None,
            text,
        })
        .collect())
}

fn workbook_to_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let mut pages = Vec::new();
    for (idx, name) in workbook.sheet_names().into_iter().enumerate() {
        let range = workbook.worksheet_range(&name)?;
        pages.push(PageText {
            page: idx as u32 + 1,
            text: render_sheet(&name, &range),
            label: Some(name),
        });
    }
    Ok(pages)
}

fn render_sheet(name: &str, range: &Range<Data>) -> String {
    let mut rows = range.rows().map(|row| {
        row.iter()
            .map(|cell| sanitize_cell(&cell.to_string()))
            .collect::<Vec<_>>()
    });
    let mut out = format!("# {name} (Sheet)\n\n");
    let Some(headers) = rows.next() else {
        out.push_str("(no rows)\n\n");
        return out;
    };
    let body = rows
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect::<Vec<_>>();
    if body.is_empty() {
        render_table(&headers, &[], &mut out);
        return out;
    }
    for (chunk_idx, chunk) in body.chunks(ROW_CHUNK).enumerate() {
        let start = chunk_idx * ROW_CHUNK + 1;
        let end = start + chunk.len() - 1;
        out.push_str(&format!("## Rows {start}-{end}\n\n"));
        render_table(&headers, chunk, &mut out);
    }
    out
}

fn render_table(headers: &[String], rows: &[Vec<String>], out: &mut String) {
    push_row(headers, out);
    out.push('|');
    for _ in headers {
        out.push_str(" --- |");
    }
    out.push('\n');
    for row in rows {
        push_row(row, out);
    }
    out.push('\n');
}

fn push_row(cells: &[String], out: &mut String) {
    out.push('|');
    for cell in cells {
        out.push(' ');
        out.push_str(cell);
        out.push_str(" |");
    }
    out.push('\n');
}

fn sanitize_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}
