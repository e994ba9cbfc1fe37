use thiserror::Error;

/// Failures of the delegated-credential lifecycle.
///
/// Everything except [`CredentialError::Configuration`], [`CredentialError::TokenEndpoint`]
/// and [`CredentialError::Storage`] is recovered at the view boundary by sending the
/// user back through the connect flow.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Client or service account credentials missing or rejected. Operator problem,
    /// reported verbatim.
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    /// Callback without a live session, or with a state that does not match it.
    #[error("invalid or expired authorization session: {0}")]
    Session(String),

    /// The user (or provider) declined the authorization request.
    #[error("authorization denied by provider: {error}{}", .description.as_deref().map(|d| format!(" - {}", d)).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// Exchange succeeded but no refresh token was issued; re-consent is required.
    #[error("consent incomplete: provider issued no refresh token")]
    ConsentIncomplete,

    /// Expired token that could not be renewed. The record is cleared.
    #[error("token refresh failed: {reason}")]
    RefreshFailure { reason: String, revoked: bool },

    /// Stored token lacks required permissions; reconnect with the union of scopes.
    #[error("granted scopes do not cover the operation (missing: {})", .missing.join(" "))]
    ScopeInsufficient { missing: Vec<String> },

    /// Nothing stored for this principal and integration.
    #[error("integration is not connected")]
    NotConnected,

    /// Token endpoint unreachable or returned an unexpected response.
    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("credential storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl CredentialError {
    /// Whether the user can fix this by reconnecting the integration.
    pub fn requires_reconnect(&self) -> bool {
        match self {
            CredentialError::Session(_)
            | CredentialError::AuthorizationDenied { .. }
            | CredentialError::ConsentIncomplete
            | CredentialError::RefreshFailure { .. }
            | CredentialError::ScopeInsufficient { .. }
            | CredentialError::NotConnected => true,
            CredentialError::Configuration(_)
            | CredentialError::TokenEndpoint(_)
            | CredentialError::Storage(_) => false,
        }
    }
}

impl From<anyhow::Error> for CredentialError {
    fn from(err: anyhow::Error) -> Self {
        CredentialError::Storage(err)
    }
}
