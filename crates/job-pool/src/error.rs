//! Error types for pool operations

use upstream::UpstreamError;

/// Errors from reservations and priming.
///
/// `Clone` because a failed prime is delivered to every caller attached to
/// the same single-flight handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The pool for this place is empty right now; retry shortly.
    #[error("Job pool depleted for place {0}, retry shortly.")]
    Absent(String),

    /// Upstream answered, but nothing survived the record filter.
    #[error("No eligible servers returned by Roblox for place {place_id} after {pages} pages")]
    PoolExhausted { place_id: String, pages: u32 },

    #[error("Roblox server fetch failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("internal pool error: {0}")]
    Internal(String),
}

impl Error {
    /// Label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Error::Absent(_) => "absent",
            Error::PoolExhausted { .. } => "exhausted",
            Error::Upstream(_) => "upstream_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
