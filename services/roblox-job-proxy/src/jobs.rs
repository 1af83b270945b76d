//! `GET /jobs/next` reservation endpoint
//!
//! Resolves the place id (query parameter, else the configured default),
//! reserves one job id from the pool and maps pool errors onto HTTP statuses.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::SecondsFormat;
use job_pool::{Error as PoolError, JobPool, Reservation};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

/// Query parameters accepted by `/jobs/next`.
#[derive(Debug, Default, Deserialize)]
pub struct NextJobQuery {
    #[serde(rename = "placeId")]
    pub place_id: Option<String>,
    pub caller: Option<String>,
}

impl NextJobQuery {
    /// Trimmed place id from the query, else the configured default.
    ///
    /// Only an absent or empty `placeId` falls back to the default; a
    /// whitespace-only value resolves to nothing and is rejected.
    pub fn resolve_place_id(&self, default_place_id: Option<&str>) -> Option<String> {
        let raw = self
            .place_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(default_place_id)?;
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Caller identity for logs: the `roblox-id` header, else `?caller=`.
pub fn caller_identity(headers: &HeaderMap, query: &NextJobQuery) -> Option<String> {
    headers
        .get("roblox-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            query
                .caller
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
}

/// Body of a successful reservation.
pub fn reservation_body(reservation: &Reservation) -> serde_json::Value {
    let record = &reservation.record;
    serde_json::json!({
        "jobId": record.job_id,
        "placeId": reservation.place_id,
        "reservedAt": reservation.reserved_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "expiresAt": reservation.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "playing": record.playing,
        "maxPlayers": record.max_players,
        "ping": record.ping,
        "fps": record.fps,
        "source": "pool",
        "poolSize": reservation.pool_size,
        "remaining": reservation.remaining,
    })
}

/// Status and body for a failed reservation.
pub fn error_response(err: &PoolError) -> (StatusCode, serde_json::Value) {
    let message = err.to_string();
    match err {
        PoolError::Absent(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "message": message }),
        ),
        PoolError::PoolExhausted { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "message": message, "error": "no_servers_available" }),
        ),
        PoolError::Upstream(_) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "message": message, "error": "roblox_fetch_failed" }),
        ),
        PoolError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "message": message, "error": "internal_error" }),
        ),
    }
}

/// Reserve the next job id for the resolved place.
#[instrument(skip_all, fields(request_id = %request_id, caller = caller.as_deref().unwrap_or("-")))]
pub async fn next_job(
    pool: &Arc<JobPool>,
    place_id: Option<String>,
    caller: Option<String>,
    request_id: String,
) -> Response {
    let Some(place_id) = place_id else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({ "message": "Missing placeId." })),
        )
            .into_response();
    };

    match pool.reserve(&place_id).await {
        Ok(reservation) => {
            info!(
                place_id = %place_id,
                job_id = %reservation.record.job_id,
                remaining = reservation.remaining,
                "job reserved"
            );
            (StatusCode::OK, axum::Json(reservation_body(&reservation))).into_response()
        }
        Err(err) => {
            let (status, body) = error_response(&err);
            if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
                error!(place_id = %place_id, error = %err, "reservation failed");
            } else {
                warn!(place_id = %place_id, error = %err, "no job available");
            }
            (status, axum::Json(body)).into_response()
        }
    }
}
