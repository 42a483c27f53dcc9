use std::path::PathBuf;
use thiserror::Error;

use crate::embeddings::EmbedError;

/// Errors surfaced by grove operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("No .grove directory found. Run 'grove init' first.")]
    NotInitialized,

    #[error("Path does not exist: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("{0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a search stage degraded to its fallback path.
///
/// None of these reach the caller of `search`; they are reported through
/// `Retrieval::fallback` and the logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FallbackReason {
    #[error("no embedding provider configured")]
    ProviderNotConfigured,

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("vector search failed: {0}")]
    VectorSearchFailed(String),

    #[error("vector search returned no results")]
    NoVectorResults,

    #[error("rerank model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("rerank scoring failed: {0}")]
    ScoringFailed(String),

    #[error("rerank scoring timed out after {0}s")]
    TimedOut(u64),
}

impl From<EmbedError> for FallbackReason {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::NotConfigured => FallbackReason::ProviderNotConfigured,
            EmbedError::Unavailable(msg) => FallbackReason::ProviderUnavailable(msg),
            EmbedError::Failed(msg) => FallbackReason::VectorSearchFailed(msg),
        }
    }
}
