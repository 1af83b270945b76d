//! Roblox public server listing client
//!
//! Issues `GET /v1/games/{placeId}/servers/Public` with the strategy's sort
//! order and capacity flag. Each page gets at most `max_attempts` attempts:
//! retryable failures (429, gateway 5xx, network) sleep a jittered backoff
//! before the next attempt, terminal failures return immediately. An attempt
//! that has not produced response headers after `slow_warning` logs a single
//! "still pending" warning and keeps waiting.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use rand::RngExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, instrument, warn};

use crate::error::{Result, UpstreamError};
use crate::{FetchStrategy, PageSource, ServerPage};

/// Browser identity sent on listing requests; the public endpoint throttles
/// obvious bot user agents harder.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Maximum characters of an error body kept for logs and errors.
const BODY_SNIPPET_CHARS: usize = 300;

/// Attempt budget and backoff bounds for one page.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    ///
    /// Exponential in `retry`, capped at `max_delay`, with "equal jitter": the
    /// result lies in `[ceiling / 2, ceiling]` so concurrent strategies that
    /// failed together do not retry in lockstep.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return ceiling;
        }
        let floor_ms = ceiling_ms / 2;
        Duration::from_millis(rand::rng().random_range(floor_ms..=ceiling_ms))
    }
}

/// Settings for `RobloxClient`.
#[derive(Debug, Clone)]
pub struct RobloxClientConfig {
    /// Base URL of the games API, e.g. `https://games.roblox.com`
    pub base_url: String,
    /// `limit` query parameter (the endpoint accepts 10, 25, 50 or 100)
    pub page_limit: u32,
    /// Per-attempt request timeout
    pub request_timeout: Duration,
    /// Delay after which a pending attempt is reported as slow
    pub slow_warning: Duration,
    pub retry: RetryPolicy,
}

impl Default for RobloxClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://games.roblox.com".into(),
            page_limit: 100,
            request_timeout: Duration::from_secs(30),
            slow_warning: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// reqwest-backed `PageSource` for the Roblox games API.
///
/// The `reqwest::Client` is injected so the service can share one pooled
/// client (with its outbound proxy) between listing fetches and pass-through
/// traffic.
pub struct RobloxClient {
    client: reqwest::Client,
    config: RobloxClientConfig,
}

impl RobloxClient {
    pub fn new(client: reqwest::Client, config: RobloxClientConfig) -> Self {
        Self { client, config }
    }

    /// Build the listing URL for one page.
    pub fn page_url(
        &self,
        place_id: &str,
        cursor: Option<&str>,
        strategy: &FetchStrategy,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            UpstreamError::Network(format!("invalid base url {}: {e}", self.config.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                UpstreamError::Network(format!(
                    "base url cannot carry a path: {}",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["v1", "games", place_id, "servers", "Public"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sortOrder", strategy.sort_order.as_query());
            query.append_pair("limit", &self.config.page_limit.to_string());
            if strategy.exclude_full {
                query.append_pair("excludeFullGames", "true");
            }
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }

    /// Fetch one page with retries.
    #[instrument(skip_all, fields(place_id = %place_id, strategy = %strategy))]
    pub async fn fetch(
        &self,
        place_id: &str,
        cursor: Option<&str>,
        strategy: &FetchStrategy,
    ) -> Result<ServerPage> {
        let url = self.page_url(place_id, cursor, strategy)?;
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.attempt(&url, attempt).await {
                Ok(page) => {
                    debug!(
                        attempt,
                        records = page.data.len(),
                        has_next = page.next_page_cursor.is_some(),
                        "listing page fetched"
                    );
                    return Ok(page);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "listing fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        retryable = e.is_retryable(),
                        error = %e,
                        "listing fetch failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Single request/response round trip.
    async fn attempt(&self, url: &Url, attempt: u32) -> Result<ServerPage> {
        let started = Instant::now();
        let send = self
            .client
            .get(url.clone())
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .send();
        tokio::pin!(send);

        let outcome = tokio::select! {
            res = &mut send => res,
            _ = tokio::time::sleep(self.config.slow_warning) => {
                warn!(
                    attempt,
                    pending_ms = started.elapsed().as_millis() as u64,
                    "listing fetch still pending"
                );
                send.await
            }
        };
        let response = outcome.map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unable to read body>"));
            let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
            warn!(
                attempt,
                status = status.as_u16(),
                body_snippet = %snippet,
                "listing fetch returned non-success status"
            );
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Network(format!("failed to read body: {e}")))?;
        ServerPage::from_json(&body)
    }
}

impl PageSource for RobloxClient {
    fn id(&self) -> &str {
        "roblox"
    }

    fn fetch_page<'a>(
        &'a self,
        place_id: &'a str,
        cursor: Option<&'a str>,
        strategy: &'a FetchStrategy,
    ) -> Pin<Box<dyn Future<Output = Result<ServerPage>> + Send + 'a>> {
        Box::pin(self.fetch(place_id, cursor, strategy))
    }
}
