//! Error types for Strata

use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum StrataError {
    /// Rejected before any side effect (missing agent, inactive agent,
    /// malformed value object)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Version conflict on a conditional event append; retryable by
    /// reloading the aggregate and replaying the command
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// A memory tier or search collaborator failed; callers degrade the
    /// affected section to empty instead of failing the request
    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    /// The language-model call failed; terminal for the request
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Retrieval index error (Tantivy)
    #[error("Search index error: {0}")]
    SearchIndex(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StrataError>;
