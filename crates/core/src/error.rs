use crate::models::DistanceMetric;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunk log line {line} is malformed: {details}")]
    Parse { line: usize, details: String },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Format(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collection {collection} uses {found} distance but {expected} was expected")]
    MetricMismatch {
        collection: String,
        expected: DistanceMetric,
        found: DistanceMetric,
    },

    #[error("vector dimension {found} does not match {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("search request failed: {0}")]
    Request(String),
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::NotFound(_)
                | SearchError::Transport(_)
                | SearchError::Http(_)
                | SearchError::BackendResponse { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
