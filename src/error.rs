use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("{0}")]
    NotFound(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("record is missing a string `id`: {0}")]
    MissingId(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid sort: {0}")]
    InvalidSort(String),

    #[error("invalid fields: {0}")]
    InvalidFields(String),

    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("page_size must be between 1 and {max}, got {requested}")]
    PageSizeOutOfRange { requested: usize, max: usize },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid DRS object: {0}")]
    InvalidDrsObject(String),

    #[error("{} validation error(s) in {key}", messages.len())]
    ValidationErrors { key: String, messages: Vec<String> },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("remote returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to load document store: {0}")]
    StoreLoad(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KiraError::NotFound(_) | KiraError::UnknownCollection(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KiraError::MissingId(_)
                | KiraError::InvalidFilter(_)
                | KiraError::InvalidSort(_)
                | KiraError::InvalidFields(_)
                | KiraError::InvalidPageToken(_)
                | KiraError::PageSizeOutOfRange { .. }
                | KiraError::InvalidPipeline(_)
                | KiraError::InvalidUrl(_)
                | KiraError::InvalidDrsObject(_)
                | KiraError::ValidationErrors { .. }
        )
    }
}
