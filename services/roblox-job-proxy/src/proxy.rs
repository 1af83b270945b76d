//! Pass-through proxy for Roblox web APIs
//!
//! `/{subdomain}/{path}` is forwarded to `{subdomain}.roblox.com/{path}` for
//! allow-listed subdomains only. Caller identity headers are stripped and a
//! browser user agent is injected; the upstream status, headers and body are
//! returned as-is apart from encoding headers, since the body is re-sent
//! already decoded.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{error, info, instrument, warn};
use upstream::BROWSER_USER_AGENT;

use crate::metrics::record_upstream_error;

/// Subdomains of roblox.com callers may reach through the pass-through.
pub const ALLOWED_SUBDOMAINS: &[&str] = &[
    "apis",
    "assetdelivery",
    "avatar",
    "badges",
    "catalog",
    "chat",
    "contacts",
    "contentstore",
    "develop",
    "economy",
    "economycreatorstats",
    "followings",
    "friends",
    "games",
    "groups",
    "groupsmoderation",
    "inventory",
    "itemconfiguration",
    "locale",
    "notifications",
    "points",
    "presence",
    "privatemessages",
    "publish",
    "search",
    "thumbnails",
    "trades",
    "translations",
    "users",
];

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers that identify the caller rather than the request.
const STRIPPED_REQUEST_HEADERS: &[&str] = &["host", "roblox-id", "user-agent", "content-length"];

/// Response headers describing an encoding the forwarded body no longer has.
const STRIPPED_RESPONSE_HEADERS: &[&str] =
    &["content-encoding", "transfer-encoding", "content-length"];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared state for the pass-through handler
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    /// Target template, `{subdomain}` replaced per request
    pub target_url: String,
    pub timeout: Duration,
}

fn message_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, axum::Json(body)).into_response()
}

pub fn is_allowed_subdomain(subdomain: &str) -> bool {
    ALLOWED_SUBDOMAINS.contains(&subdomain)
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn forwardable_request_header(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !STRIPPED_REQUEST_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
}

fn forwardable_response_header(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !STRIPPED_RESPONSE_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
}

/// Build the upstream URL for `subdomain` and the remaining path and query.
pub fn target_url(template: &str, subdomain: &str, path: &str, query: Option<&str>) -> String {
    let base = template.replace("{subdomain}", subdomain);
    let mut url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Forward one request to the allow-listed Roblox subdomain.
///
/// GET and HEAD are retried on timeout (3 attempts in total); other methods
/// are sent once since they may not be idempotent.
#[instrument(
    skip_all,
    fields(request_id = %request_id, method = %request.method(), subdomain = %subdomain)
)]
pub async fn forward(
    state: &ProxyState,
    subdomain: &str,
    path: &str,
    request: axum::http::Request<Body>,
    request_id: String,
) -> Response {
    if subdomain.trim().is_empty() {
        return message_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "message": "Missing ROBLOX subdomain." }),
        );
    }
    if !is_allowed_subdomain(subdomain) {
        warn!("rejected pass-through to subdomain outside the allow-list");
        return message_response(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "message": "Specified subdomain is not allowed." }),
        );
    }

    let method = request.method().clone();
    let url = target_url(&state.target_url, subdomain, path, request.uri().query());

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        if forwardable_request_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_static(BROWSER_USER_AGENT),
    );

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return message_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "message": format!("invalid request body: {e}") }),
            );
        }
    };
    let sends_body = method != Method::GET && method != Method::HEAD;
    let max_attempts = if sends_body { 1 } else { MAX_ATTEMPTS };

    let mut attempt = 1;
    let upstream_response = loop {
        let mut req = state
            .client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .timeout(state.timeout);
        if sends_body {
            req = req.body(body_bytes.clone());
        }

        match req.send().await {
            Ok(response) => break response,
            Err(e) if e.is_timeout() && attempt < max_attempts => {
                warn!(attempt, "pass-through timed out, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => {
                let error_type = if e.is_timeout() { "timeout" } else { "connection" };
                record_upstream_error(error_type);
                error!(error = %e, attempts = attempt, "pass-through request failed");
                return proxy_failure(&e.to_string());
            }
        }
    };

    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();
    let resp_body = match upstream_response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            record_upstream_error("body");
            error!(error = %e, "failed to read pass-through response body");
            return proxy_failure(&e.to_string());
        }
    };
    info!(status = status.as_u16(), body_len = resp_body.len(), "pass-through complete");

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if forwardable_response_header(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from(resp_body))
        .unwrap_or_else(|e| proxy_failure(&format!("response build error: {e}")))
}

fn proxy_failure(error: &str) -> Response {
    message_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({ "message": "Proxy request failed", "error": error }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Cookie"));
    }

    #[test]
    fn caller_identity_headers_are_not_forwarded() {
        assert!(!forwardable_request_header("Host"));
        assert!(!forwardable_request_header("roblox-id"));
        assert!(!forwardable_request_header("User-Agent"));
        assert!(forwardable_request_header("x-csrf-token"));
        assert!(forwardable_request_header("cookie"));
    }

    #[test]
    fn encoding_headers_are_not_returned() {
        assert!(!forwardable_response_header("Content-Encoding"));
        assert!(!forwardable_response_header("transfer-encoding"));
        assert!(forwardable_response_header("content-type"));
        assert!(forwardable_response_header("set-cookie"));
    }

    #[test]
    fn allow_list_membership() {
        assert!(is_allowed_subdomain("users"));
        assert!(is_allowed_subdomain("economycreatorstats"));
        assert!(!is_allowed_subdomain("auth"));
        assert!(!is_allowed_subdomain("Users"));
        assert_eq!(ALLOWED_SUBDOMAINS.len(), 29);
    }

    #[test]
    fn target_url_substitutes_subdomain_and_keeps_query() {
        assert_eq!(
            target_url("https://{subdomain}.roblox.com", "users", "v1/users/1", Some("a=1&b=2")),
            "https://users.roblox.com/v1/users/1?a=1&b=2"
        );
        assert_eq!(
            target_url("http://127.0.0.1:9/{subdomain}/", "games", "/v1/x", None),
            "http://127.0.0.1:9/games/v1/x"
        );
        assert_eq!(
            target_url("https://{subdomain}.roblox.com", "users", "v1", Some("")),
            "https://users.roblox.com/v1"
        );
    }

    #[test]
    fn failure_response_is_500() {
        let resp = proxy_failure("connection refused");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
