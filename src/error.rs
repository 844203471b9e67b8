use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileKind(String),

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table store is not initialized")]
    StoreUnavailable,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Metadata registry error: {0}")]
    Registry(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for IntakeError {
    fn from(err: polars::error::PolarsError) -> Self {
        IntakeError::Polars(err.to_string())
    }
}

impl From<rusqlite::Error> for IntakeError {
    fn from(err: rusqlite::Error) -> Self {
        IntakeError::Database(err.to_string())
    }
}

impl From<calamine::Error> for IntakeError {
    fn from(err: calamine::Error) -> Self {
        IntakeError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;
