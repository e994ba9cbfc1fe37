//! HTTP error responses.

use crate::auth::PrincipalError;
use crate::credentials::Integration;
use crate::google::ApiError;
use crate::oauth::CredentialError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Serialize, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    /// Where to send the browser to (re)connect the integration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_url: Option<String>,
}

/// Application error types for the API
#[derive(Debug, PartialEq)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    /// The user must run the connect flow again
    Reconnect { message: String, reconnect_url: String },
    Forbidden(String),
    NotFound(String),
    RateLimited { message: String, retry_after_secs: Option<u64> },
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_message, reconnect_url) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Reconnect { message, reconnect_url } => {
                (StatusCode::UNAUTHORIZED, message, Some(reconnect_url))
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::RateLimited { message, retry_after_secs } => {
                retry_after = retry_after_secs;
                (StatusCode::TOO_MANY_REQUESTS, message, None)
            }
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            reconnect_url,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<PrincipalError> for AppError {
    fn from(err: PrincipalError) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", err))
    }
}

impl AppError {
    /// Map a credential lifecycle failure for `integration`
    pub fn from_credential(integration: Integration, err: CredentialError) -> Self {
        match err {
            CredentialError::ScopeInsufficient { ref missing } => AppError::Reconnect {
                reconnect_url: reconnect_url(integration, missing),
                message: err.to_string(),
            },
            CredentialError::Configuration(_) => {
                error!(integration = %integration, error = %err, "OAuth misconfigured");
                AppError::ServerError(err.to_string())
            }
            CredentialError::TokenEndpoint(_) => AppError::BadGateway(err.to_string()),
            CredentialError::Storage(_) => {
                error!(integration = %integration, error = %err, "Credential storage failure");
                AppError::ServerError("Credential storage unavailable".to_string())
            }
            other => AppError::Reconnect {
                message: other.to_string(),
                reconnect_url: reconnect_url(integration, &[]),
            },
        }
    }

    /// Map a failed provider call for `integration`
    pub fn from_api(integration: Integration, err: ApiError) -> Self {
        match err {
            ApiError::Unauthenticated(_) => AppError::Reconnect {
                message: err.to_string(),
                reconnect_url: reconnect_url(integration, &[]),
            },
            ApiError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            ApiError::NotFound(_) => AppError::NotFound(err.to_string()),
            ApiError::RateLimited { retry_after_secs, .. } => AppError::RateLimited {
                message: err.to_string(),
                retry_after_secs,
            },
            ApiError::Other { status: Some(400), .. } => AppError::BadRequest(err.to_string()),
            ApiError::Transient { .. } | ApiError::Other { .. } => AppError::BadGateway(err.to_string()),
        }
    }
}

/// Start route for `integration`, asking for `extra_scopes` on top of the defaults
pub fn reconnect_url(integration: Integration, extra_scopes: &[String]) -> String {
    let base = format!("/api/integrations/{}/oauth/start", integration);
    if extra_scopes.is_empty() {
        base
    } else {
        format!("{}?scope={}", base, urlencoding::encode(&extra_scopes.join(" ")))
    }
}
