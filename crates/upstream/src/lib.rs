//! Upstream server-listing abstraction
//!
//! Defines the `PageSource` trait that decouples the job pool engine from the
//! HTTP details of the Roblox public server listing. `RobloxClient` is the
//! production implementation (reqwest, retries, slow-fetch warning); tests
//! substitute scripted sources behind the same trait.

pub mod error;
pub mod roblox;
pub mod strategy;

pub use error::{Result, UpstreamError};
pub use roblox::{BROWSER_USER_AGENT, RetryPolicy, RobloxClient, RobloxClientConfig};
pub use strategy::{FetchStrategy, SortOrder};

use std::future::Future;
use std::pin::Pin;

/// Classification of upstream failures to decide whether another attempt is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Rate limiting, gateway errors, network failures
    Retryable,
    /// Client errors and malformed bodies; retrying would repeat the same answer
    Terminal,
}

/// Classify a non-2xx upstream HTTP status.
///
/// 429 and the 500/502/503/504 gateway family are retryable. Every other
/// status ends the attempt loop immediately.
pub fn classify_status(status: u16) -> ErrorClassification {
    match status {
        429 | 500 | 502 | 503 | 504 => ErrorClassification::Retryable,
        _ => ErrorClassification::Terminal,
    }
}

/// One page of the upstream listing.
///
/// `data` holds raw, unvalidated server records; eligibility and shape checks
/// happen later in the pool's record filter. `next_page_cursor` is `None` on
/// the last page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerPage {
    pub data: Vec<serde_json::Value>,
    pub next_page_cursor: Option<String>,
}

impl ServerPage {
    /// Parse a listing response body.
    ///
    /// A body that is not JSON is malformed. A JSON body without a `data`
    /// array is treated as an empty page, and an empty or non-string
    /// `nextPageCursor` means there are no further pages.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| UpstreamError::Malformed(format!("invalid JSON body: {e}")))?;

        let data = match value.get("data") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let next_page_cursor = value
            .get("nextPageCursor")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_owned);

        Ok(Self {
            data,
            next_page_cursor,
        })
    }
}

/// Source of paginated server listings for a place.
///
/// Implementations own their retry policy: a returned error means the page
/// could not be fetched after all attempts.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn PageSource>`).
pub trait PageSource: Send + Sync {
    /// Identifier for logging (e.g. "roblox")
    fn id(&self) -> &str;

    /// Fetch one page for `place_id` using `strategy`, starting at `cursor`
    /// (`None` requests the first page).
    fn fetch_page<'a>(
        &'a self,
        place_id: &'a str,
        cursor: Option<&'a str>,
        strategy: &'a FetchStrategy,
    ) -> Pin<Box<dyn Future<Output = Result<ServerPage>> + Send + 'a>>;
}
