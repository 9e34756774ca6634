use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("pdf extract failed: {0}")]
    Pdf(String),
    #[error("spreadsheet read failed: {0}")]
    Spreadsheet(String),
    #[error("document contains no extractable text")]
    EmptyDocument,
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<calamine::Error> for CoreError {
    fn from(value: calamine::Error) -> Self {
        Self::Spreadsheet(value.to_string())
    }
}
