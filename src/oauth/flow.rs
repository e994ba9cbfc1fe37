//! Authorization-code flow.
//!
//! 1. `start` records a session and returns the provider URL to redirect to
//! 2. The user consents on the provider's site
//! 3. The provider redirects to the callback with `code` and `state`
//! 4. `complete` consumes the session, exchanges the code and stores the token

use super::exchange::{TokenEndpoint, TokenEndpointError};
use super::provider::build_authorize_url;
use super::session::{OAuthSession, SessionStore};
use super::CredentialError;
use crate::config::ClientConfig;
use crate::credentials::{CredentialStore, Integration, TokenRecord};
use crate::scope::parse_scope_list;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// OAuth callback query parameters
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Drives connect attempts from redirect to stored token
pub struct AuthorizationFlow {
    client: ClientConfig,
    sessions: Arc<SessionStore>,
    store: Arc<CredentialStore>,
    endpoint: TokenEndpoint,
}

impl AuthorizationFlow {
    pub fn new(
        client: ClientConfig,
        sessions: Arc<SessionStore>,
        store: Arc<CredentialStore>,
        endpoint: TokenEndpoint,
    ) -> Self {
        Self {
            client,
            sessions,
            store,
            endpoint,
        }
    }

    /// Begin a connect attempt and return the provider authorization URL
    ///
    /// Replaces any unfinished attempt for the same principal and integration.
    pub fn start(
        &self,
        principal_id: &str,
        integration: Integration,
        requested_scopes: &[String],
        redirect_target: &str,
    ) -> Result<String, CredentialError> {
        let mut scopes: Vec<String> = Vec::with_capacity(requested_scopes.len());
        for scope in requested_scopes {
            if !scope.is_empty() && !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }

        let session = OAuthSession::new(principal_id, integration, redirect_target, scopes);
        self.sessions.begin(&session)?;

        info!(
            principal = %principal_id,
            integration = %integration,
            scopes = %session.requested_scopes.join(" "),
            "Redirecting to OAuth provider"
        );

        Ok(build_authorize_url(
            &self.client,
            &session.redirect_target,
            &session.requested_scopes,
            &session.state_nonce,
        ))
    }

    /// Finish a connect attempt from the provider callback
    ///
    /// The pending session is consumed before anything else, so a callback can
    /// only ever be completed once. Nothing is stored unless the provider issued
    /// a refresh token.
    pub async fn complete(
        &self,
        principal_id: &str,
        integration: Integration,
        params: &CallbackParams,
    ) -> Result<TokenRecord, CredentialError> {
        debug!(principal = %principal_id, integration = %integration, "OAuth callback received");

        let session = self
            .sessions
            .take(principal_id, integration)?
            .ok_or_else(|| {
                warn!(principal = %principal_id, integration = %integration, "No live OAuth session for callback");
                CredentialError::Session("no authorization in progress".to_string())
            })?;

        if params.state.as_deref() != Some(session.state_nonce.as_str()) {
            warn!(principal = %principal_id, integration = %integration, "OAuth state mismatch");
            return Err(CredentialError::Session("state does not match".to_string()));
        }

        if let Some(error) = &params.error {
            warn!(
                principal = %principal_id,
                integration = %integration,
                error = %error,
                description = ?params.error_description,
                "OAuth authorization failed"
            );
            return Err(CredentialError::AuthorizationDenied {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CredentialError::Session("callback carried no authorization code".to_string()))?;

        let response = self
            .endpoint
            .exchange_code(&self.client, code, &session.redirect_target)
            .await
            .map_err(|e| {
                error!(principal = %principal_id, integration = %integration, error = %e, "Token exchange failed");
                exchange_error(e)
            })?;

        let Some(refresh_token) = response.refresh_token.clone() else {
            warn!(
                principal = %principal_id,
                integration = %integration,
                "Provider issued no refresh token; discarding tokens"
            );
            return Err(CredentialError::ConsentIncomplete);
        };

        let expiry = response.expiry_from(Utc::now()).map_err(|e| {
            error!(principal = %principal_id, integration = %integration, error = %e, "Token exchange returned an unusable lifetime");
            exchange_error(e)
        })?;

        let granted_scopes = match response.scope.as_deref().map(parse_scope_list) {
            Some(granted) if !granted.is_empty() => granted,
            _ => session.requested_scopes.iter().cloned().collect(),
        };

        let record = TokenRecord {
            principal_id: principal_id.to_string(),
            access_token: response.access_token.clone(),
            refresh_token: Some(refresh_token),
            expiry: Some(expiry),
            granted_scopes,
        };

        self.store.put(principal_id, integration, &record)?;

        info!(
            principal = %principal_id,
            integration = %integration,
            scopes = record.granted_scopes.len(),
            "OAuth flow completed successfully"
        );

        Ok(record)
    }
}

/// Map a code-exchange failure onto the lifecycle error kinds
fn exchange_error(err: TokenEndpointError) -> CredentialError {
    match &err {
        TokenEndpointError::Rejected { error, description, .. } => match error.as_str() {
            "invalid_client" | "unauthorized_client" | "redirect_uri_mismatch" => {
                CredentialError::Configuration(match description {
                    Some(d) => format!("{}: {}", error, d),
                    None => error.clone(),
                })
            }
            // Code expired, already redeemed, or issued for another redirect
            "invalid_grant" => {
                CredentialError::Session("authorization code was rejected".to_string())
            }
            _ => CredentialError::TokenEndpoint(err.to_string()),
        },
        TokenEndpointError::Unavailable(_) => CredentialError::TokenEndpoint(err.to_string()),
    }
}
