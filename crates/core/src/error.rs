//! Error types for the IA Hub domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; the pipeline folds them into
//! the top-level [`Error`], whose [`ErrorKind`] is what callers see.

use serde::Serialize;
use thiserror::Error;

/// The top-level error type for pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed inbound payload, missing identifiers or invalid arguments.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Persistence error: {0}")]
    Persistence(#[source] StoreError),

    #[error("Generation error: {0}")]
    Generation(#[from] ProviderError),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The classification exposed to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Retrieval(_) => ErrorKind::Retrieval,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Generation(_) => ErrorKind::Generation,
        }
    }

    /// Whether re-delivering the same inbound event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration { .. } => false,
            Self::Retrieval(err) => err.is_transient(),
            Self::Persistence(err) => err.is_transient(),
            Self::Generation(err) => err.is_transient(),
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        Self::config(err.to_string())
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification, safe to hand to external callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Retrieval,
    Persistence,
    Generation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Retrieval => "retrieval",
            Self::Persistence => "persistence",
            Self::Generation => "generation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Network-level conditions that a single retry may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection pool exhausted: {0}")]
    ResourceExhausted(String),

    #[error("History conflict on session {session}: expected {expected} messages, found {actual}")]
    Conflict {
        session: String,
        expected: usize,
        actual: usize,
    },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    /// A conflict or an unreachable database clears on its own; a broken
    /// schema does not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MigrationFailed(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Embedding generation failed: {0}")]
    Embedding(#[source] ProviderError),

    #[error("Similarity search failed: {0}")]
    Search(#[source] StoreError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl RetrievalError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Embedding(err) => err.is_transient(),
            Self::Search(err) => err.is_transient(),
            Self::DimensionMismatch { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessage(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,
}
