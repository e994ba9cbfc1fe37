//! Classification of provider API failures.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Failure of a call to a provider resource API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Token invalid or revoked. The stored record must be cleared.
    #[error("provider rejected the access token: {0}")]
    Unauthenticated(String),

    /// Token lacks the scope or the account lacks the permission.
    #[error("provider refused the operation: {0}")]
    Forbidden(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// Caller should back off; this layer never retries it.
    #[error("rate limited by provider (retry after {retry_after_secs:?}s): {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// 5xx or transport failure. Idempotent reads are retried once.
    #[error("transient provider failure (status {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("provider API error (status {status:?}): {message}")]
    Other {
        status: Option<u16>,
        message: String,
    },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    /// Maps a transport-level failure (no HTTP response or unreadable body).
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ApiError::Transient {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        } else {
            ApiError::Other {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Google JSON error envelope: `{"error": {"code", "message", "errors": [{"reason"}], "status"}}`.
#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize, Default)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

const QUOTA_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Turns a non-success response into an [`ApiError`].
///
/// - 401 → `Unauthenticated`
/// - 403 with a quota reason, or 429 → `RateLimited` (with `Retry-After` seconds)
/// - 403 otherwise → `Forbidden`
/// - 404 / 410 → `NotFound`
/// - 5xx → `Transient`
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let error_body = envelope.error.unwrap_or_default();
    let reasons: Vec<String> = error_body
        .errors
        .into_iter()
        .filter_map(|item| item.reason)
        .collect();
    let message = error_body.message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.to_string()
        } else {
            body.trim().to_string()
        }
    });

    let retry_after_secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthenticated(message),
        StatusCode::FORBIDDEN if reasons.iter().any(|r| QUOTA_REASONS.contains(&r.as_str())) => {
            ApiError::RateLimited {
                retry_after_secs,
                message,
            }
        }
        StatusCode::FORBIDDEN => ApiError::Forbidden(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after_secs,
            message,
        },
        s if s.is_server_error() => ApiError::Transient {
            status: Some(s.as_u16()),
            message,
        },
        s => ApiError::Other {
            status: Some(s.as_u16()),
            message,
        },
    }
}
