//! Service runtime state shared by the handlers
//!
//! Request counters for `/health`, the drain deadline used on shutdown, and
//! the outbound HTTP client every upstream call goes through.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use common::Secret;
use tracing::info;

use crate::error::{Error, Result};

/// How long in-flight requests may take to finish after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime metrics tracked while the service is running
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being processed; reported if the drain deadline passes
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Count a request as started; the returned guard marks it finished on drop.
    pub fn begin_request(&self) -> RequestGuard {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct RequestGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the shared outbound client, routed through `proxy_url` when set.
pub fn build_http_client(proxy_url: Option<&Secret<String>>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(url) = proxy_url {
        let proxy = reqwest::Proxy::all(url.expose().as_str()).map_err(|e| Error::ProxyUrl {
            url: url.redacted_url(),
            reason: e.to_string(),
        })?;
        info!(proxy = %url.redacted_url(), "routing upstream traffic through outbound proxy");
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| Error::HttpClient(e.to_string()))
}
