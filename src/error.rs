//! Error types for triage-core.

use thiserror::Error;

/// Result type alias using triage-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during classification operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Graph store error
    #[error("Graph store error: {0}")]
    GraphStore(String),

    /// Vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Record store error (tickets, HITL tasks, metrics)
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// LLM API error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Input rejected at the boundary
    #[error("Validation error: {0}")]
    Validation(String),

    /// Batch submission rejected (too large, unknown id, wrong state)
    #[error("Batch error: {0}")]
    Batch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a graph store error.
    pub fn graph(message: impl Into<String>) -> Self {
        Self::GraphStore(message.into())
    }

    /// Create a vector store error.
    pub fn vector(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create a record store error.
    pub fn records(message: impl Into<String>) -> Self {
        Self::RecordStore(message.into())
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a batch error.
    pub fn batch(message: impl Into<String>) -> Self {
        Self::Batch(message.into())
    }
}
