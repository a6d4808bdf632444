use thiserror::Error;

/// Vectorization failed.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("{0} API key is not configured")]
    MissingCredentials(String),

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Embedding provider returned an empty vector")]
    EmptyVector,
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbeddingError::Timeout
        } else {
            EmbeddingError::Request(e.to_string())
        }
    }
}

/// The vector store was unreachable or answered with something unusable.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Vector store request timed out")]
    Timeout,

    #[error("Vector store request failed: {0}")]
    Request(String),

    #[error("Vector store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed vector store response: {0}")]
    MalformedResponse(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RetrievalError::Timeout
        } else {
            RetrievalError::Request(e.to_string())
        }
    }
}
