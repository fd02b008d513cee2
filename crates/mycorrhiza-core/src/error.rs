//! Error types shared by the store layer and the catalog engines.
//!
//! Two layers:
//!
//! | Type | Raised by | Meaning |
//! |------|-----------|---------|
//! | [`StoreError`] | [`Store`](crate::store::Store) implementations | Storage failed, or a uniqueness constraint rejected a write |
//! | [`CatalogError`] | Engines and harvest orchestration | A record was invalid, a reference did not resolve, or a source was unreachable |
//!
//! Operator-facing failures of merge and aggregate are not errors at all:
//! they come back as an [`Outcome::Error`] so the caller can report them
//! without unwinding.

use serde::Serialize;
use thiserror::Error;

/// Result alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected an insert. The upsert loop reacts
    /// to this by re-reading.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    /// An update targeted a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// `get_or_create` kept losing the race and gave up.
    #[error("gave up creating {what} after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: usize },

    /// Anything else the backend reported.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Failures of the catalog engines.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A non-deleted record arrived without a content fingerprint.
    /// Fatal for that record only.
    #[error("invalid record {identifier}: {reason}")]
    Validation { identifier: String, reason: String },

    /// A referenced row does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// The harvesting transport could not reach a source. Callers catch
    /// this per source and move on.
    #[error("connection to {source_name} failed: {reason}")]
    Connectivity { source_name: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CatalogError::Validation { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, CatalogError::Connectivity { .. })
    }
}

/// Structured result of an operator-triggered operation.
///
/// Serializes as `{"success": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success(String),
    Error(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(m) | Outcome::Error(m) => m,
        }
    }
}
