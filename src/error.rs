//! Error types for Mnema

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using Mnema's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Mnema
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input on a create or search call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration (e.g. bleed >= chunk_size)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider unavailable or erroring
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Backing persistence failure
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource not found (explicit lookups only; deletes of absent ids succeed)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Ingest created the document but some fragments failed
    #[error("Partial ingest of document {}: {} of {} fragment(s) failed", .0.document_id, .0.failed.len(), .0.failed.len() + .0.succeeded.len())]
    PartialIngest(IngestFailure),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-fragment accounting for a partially failed ingest.
///
/// The document was created before any fragment work started, so the caller
/// can retry just the failed fragments; chunking is deterministic and will
/// regenerate identical fragment texts.
#[derive(Debug, Clone)]
pub struct IngestFailure {
    /// The document that was created before fragments failed
    pub document_id: Uuid,
    /// Fragment ids that were stored successfully
    pub succeeded: Vec<Uuid>,
    /// Fragments that failed, by chunk index
    pub failed: Vec<FragmentError>,
}

/// A single failed fragment within an ingest
#[derive(Debug, Clone)]
pub struct FragmentError {
    /// Index of the fragment in chunking order
    pub index: usize,
    /// Why it failed
    pub reason: String,
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider(_) | Error::Store(_) | Error::Http(_) | Error::PartialIngest(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Config(_) | Error::NotFound(_)
        )
    }
}
