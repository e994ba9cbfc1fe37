//! OAuth token endpoint client.
//!
//! Handles exchanging authorization codes for tokens, renewing access tokens
//! with a refresh token and the service-account JWT-bearer grant.

use crate::config::ClientConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Grant type for service-account assertions (RFC 7523)
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime assumed when a token response carries no `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 1800;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Space-delimited scopes actually granted; may be omitted
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry of the issued access token
    ///
    /// A missing lifetime falls back to [`DEFAULT_TOKEN_LIFETIME_SECS`]. A lifetime
    /// that is not positive or does not fit a timestamp is rejected.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TokenEndpointError> {
        let seconds = match self.expires_in {
            Some(seconds) if seconds > 0 => seconds,
            Some(seconds) => {
                return Err(TokenEndpointError::Unavailable(format!(
                    "token response has non-positive expires_in: {}",
                    seconds
                )))
            }
            None => {
                tracing::warn!(
                    "Token response has no expires_in, assuming {}s",
                    DEFAULT_TOKEN_LIFETIME_SECS
                );
                DEFAULT_TOKEN_LIFETIME_SECS
            }
        };

        Duration::try_seconds(seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                TokenEndpointError::Unavailable(format!(
                    "token response expires_in out of range: {}",
                    seconds
                ))
            })
    }
}

/// Standard OAuth error body (`{"error": "...", "error_description": "..."}`)
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint failures
#[derive(Debug, Error, PartialEq)]
pub enum TokenEndpointError {
    /// The provider answered and refused the grant
    #[error("token endpoint rejected request ({status}): {error}")]
    Rejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    /// Network failure, timeout, 5xx, or a body that could not be understood
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

/// HTTP client for the provider's token endpoint
#[derive(Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
}

impl TokenEndpoint {
    /// Create a client with a request timeout
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build token endpoint HTTP client")?;
        Ok(Self { http })
    }

    /// Exchange authorization code for tokens
    ///
    /// # Arguments
    /// * `client` - OAuth client registration (token URL, id, secret)
    /// * `code` - Authorization code from callback
    /// * `redirect_uri` - Redirect URI used in the authorization request
    pub async fn exchange_code(
        &self,
        client: &ClientConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        tracing::debug!("Exchanging authorization code for token at {}", client.token_url);

        let response = self
            .post(
                &client.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                ],
            )
            .await?;

        tracing::debug!(
            "Token exchange successful, has_refresh_token={}, expires_in={:?}",
            response.refresh_token.is_some(),
            response.expires_in
        );

        Ok(response)
    }

    /// Obtain a new access token with a refresh token
    pub async fn refresh(
        &self,
        client: &ClientConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        tracing::debug!("Refreshing access token at {}", client.token_url);

        self.post(
            &client.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ],
        )
        .await
    }

    /// Trade a signed service-account assertion for an access token
    pub async fn jwt_bearer(
        &self,
        token_url: &str,
        assertion: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        tracing::debug!("Requesting service account token at {}", token_url);

        self.post(
            token_url,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)],
        )
        .await
    }

    async fn post(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, TokenEndpointError> {
        let response = self
            .http
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| TokenEndpointError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenEndpointError::Unavailable(format!("failed to read response: {}", e)))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                TokenEndpointError::Unavailable(format!("failed to parse token response: {}", e))
            });
        }

        if status.is_client_error() {
            let rejection = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(parsed) => TokenEndpointError::Rejected {
                    status: status.as_u16(),
                    error: parsed.error,
                    description: parsed.error_description,
                },
                Err(_) => TokenEndpointError::Rejected {
                    status: status.as_u16(),
                    error: format!("http_{}", status.as_u16()),
                    description: Some(body.trim().chars().take(200).collect())
                        .filter(|d: &String| !d.is_empty()),
                },
            };
            return Err(rejection);
        }

        Err(TokenEndpointError::Unavailable(format!(
            "status {}: {}",
            status,
            body.trim().chars().take(200).collect::<String>()
        )))
    }
}
