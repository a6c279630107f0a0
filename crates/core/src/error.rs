use crate::models::InvalidReason;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid document {document_id}: {reason}")]
    InvalidDocument {
        document_id: String,
        reason: InvalidReason,
    },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient service error: {0}")]
    Transient(String),

    #[error("request rejected by service: {0}")]
    Rejected(String),

    #[error("invalid service response: {0}")]
    InvalidResponse(String),

    #[error("call timed out after {0} ms")]
    Timeout(u64),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("transient service error: {0}")]
    Transient(String),

    #[error("embedding request rejected: {0}")]
    Rejected(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timed out after {0} ms")]
    Timeout(u64),

    #[error("embedding cancelled")]
    Cancelled,
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not a json object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unexpected field `{0}`")]
    UnexpectedField(String),

    #[error("field `{0}` must be a string or null")]
    WrongType(&'static str),

    #[error("summary is empty")]
    EmptySummary,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with embedding model `{index_model}` but queried with `{query_model}`")]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },

    #[error("unsupported index format version {found} (expected {expected})")]
    FormatVersion { expected: u32, found: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no documents to process: {0}")]
    NoDocuments(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
