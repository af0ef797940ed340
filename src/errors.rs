//! Structured error types for the retrieval engine
//!
//! Every public failure mode carries a machine-readable code and a
//! retryability flag so callers can branch without string matching.
//! Messages identify the bank and request but never embed fact text.

use std::fmt;

/// Engine error kinds surfaced to callers.
#[derive(Debug)]
pub enum EngineError {
    /// The requested bank does not exist. Non-retryable.
    BankNotFound { bank_id: String },

    /// Persistent failure of the store adapter. Retryable.
    StoreUnavailable { bank_id: String, detail: String },

    /// A single store call exceeded its per-call deadline. Internal:
    /// strategies convert this into an empty result and record it in
    /// the trace; it only escapes when every strategy fails.
    StoreDeadline { operation: &'static str },

    /// The embedding service failed. Fatal for the request.
    EmbeddingFailed { detail: String },

    /// The request deadline expired before any candidate list was
    /// produced. Fatal.
    DeadlineExceeded { bank_id: String, request_id: String },

    /// Cross-encoder backpressure: the inference queue is deep enough
    /// that this request cannot finish within its deadline slack.
    /// Retryable with jitter.
    Overloaded { estimated_wait_ms: u64 },

    /// Empty query text or a zero token budget. Non-retryable.
    InvalidQuery { reason: String },

    /// Generic wrapper for unexpected internal errors.
    Internal(anyhow::Error),
}

impl EngineError {
    /// Machine-readable error code for client identification.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BankNotFound { .. } => "BANK_NOT_FOUND",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::StoreDeadline { .. } => "STORE_DEADLINE",
            Self::EmbeddingFailed { .. } => "EMBEDDING_FAILED",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Overloaded { .. } => "OVERLOADED",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the identical request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::Overloaded { .. }
        )
    }

    /// Detailed human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::BankNotFound { bank_id } => format!("Bank not found: {bank_id}"),
            Self::StoreUnavailable { bank_id, detail } => {
                format!("Store unavailable for bank '{bank_id}': {detail}")
            }
            Self::StoreDeadline { operation } => {
                format!("Store call '{operation}' exceeded its deadline")
            }
            Self::EmbeddingFailed { detail } => format!("Embedding failed: {detail}"),
            Self::DeadlineExceeded {
                bank_id,
                request_id,
            } => {
                format!("Request {request_id} on bank '{bank_id}' hit its deadline before producing candidates")
            }
            Self::Overloaded { estimated_wait_ms } => {
                format!("Cross-encoder queue overloaded (estimated wait {estimated_wait_ms} ms)")
            }
            Self::InvalidQuery { reason } => format!("Invalid query: {reason}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Type alias for Results using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
