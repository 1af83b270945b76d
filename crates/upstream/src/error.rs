//! Error types for upstream listing fetches

use crate::{ErrorClassification, classify_status};

/// Failure to fetch a listing page.
///
/// `Clone` so a single priming failure can be handed to every caller waiting
/// on the same in-flight prime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream request failed: {0}")]
    Network(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn classification(&self) -> ErrorClassification {
        match self {
            UpstreamError::Status { status, .. } => classify_status(*status),
            UpstreamError::Network(_) => ErrorClassification::Retryable,
            UpstreamError::Malformed(_) => ErrorClassification::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classification() == ErrorClassification::Retryable
    }

    /// Short label for metrics and throttle keys.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Status { status: 429, .. } => "rate_limited",
            UpstreamError::Status { .. } => "status",
            UpstreamError::Network(_) => "network",
            UpstreamError::Malformed(_) => "malformed",
        }
    }
}

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;
