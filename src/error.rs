//! Error types for focus retrieval.
//!
//! | Variant | Origin | Retry? |
//! |---------|--------|--------|
//! | `InvalidInput` | malformed image reference, focus rectangle or vectors | no |
//! | `CollaboratorUnavailable` | embedding model or vector index failed | yes |
//! | `DegeneratePipeline` | zero-variance corpus at fit time | no |
//! | `PipelineStore` | persisting or loading the fitted pipeline | no |
//! | `Config` | invalid configuration | no |
//!
//! An empty focus region is not an error; see [`crate::search::RankingMode::FocusFallback`].

use std::fmt;

use thiserror::Error;

/// External system a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    /// The service that turns images into vectors
    EmbeddingModel,
    /// The nearest-neighbor store
    VectorIndex,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collaborator::EmbeddingModel => write!(f, "embedding model"),
            Collaborator::VectorIndex => write!(f, "vector index"),
        }
    }
}

/// Top-level error type for recommendation and ingestion.
#[derive(Debug, Error)]
pub enum RecommendError {
    /// Request rejected before any collaborator call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A collaborator call failed or returned a non-success response.
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        reason: String,
    },

    /// Fitted projection range carries no information.
    #[error("degenerate foreground pipeline: projection range [{min}, {max}] has no spread")]
    DegeneratePipeline { min: f64, max: f64 },

    /// Persisting or loading the fitted pipeline failed.
    #[error("pipeline store error: {0}")]
    PipelineStore(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RecommendError {
    /// Shorthand for an embedding model failure.
    pub fn embedding(reason: impl Into<String>) -> Self {
        RecommendError::CollaboratorUnavailable {
            collaborator: Collaborator::EmbeddingModel,
            reason: reason.into(),
        }
    }

    /// Shorthand for a vector index failure.
    pub fn index(reason: impl Into<String>) -> Self {
        RecommendError::CollaboratorUnavailable {
            collaborator: Collaborator::VectorIndex,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecommendError::CollaboratorUnavailable { .. })
    }
}

impl From<std::io::Error> for RecommendError {
    fn from(err: std::io::Error) -> Self {
        RecommendError::PipelineStore(err.to_string())
    }
}

impl From<serde_json::Error> for RecommendError {
    fn from(err: serde_json::Error) -> Self {
        RecommendError::PipelineStore(err.to_string())
    }
}

/// Result type for focus retrieval operations.
pub type Result<T> = std::result::Result<T, RecommendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_collaborator_failures_are_retryable() {
        assert!(RecommendError::embedding("timeout").is_retryable());
        assert!(RecommendError::index("lock poisoned").is_retryable());
        assert!(!RecommendError::InvalidInput("x1 > x2".into()).is_retryable());
        assert!(!RecommendError::DegeneratePipeline { min: 0.0, max: 0.0 }.is_retryable());
    }

    #[test]
    fn test_display_names_collaborator() {
        let err = RecommendError::embedding("status 503");
        assert_eq!(err.to_string(), "embedding model unavailable: status 503");
    }
}
