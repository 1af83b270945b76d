//! Service startup errors
//!
//! Per-request failures are answered directly by the handlers as JSON
//! responses and never propagate as Rust errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid outbound proxy {url}: {reason}")]
    ProxyUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
