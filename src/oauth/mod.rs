//! Delegated OAuth 2.0 credentials for Google integrations.
//!
//! Implements the authorization code flow with offline access:
//! 1. User clicks "Connect" in the case manager
//! 2. GET /api/integrations/:integration/oauth/start → Redirect to Google
//! 3. User consents on Google's site
//! 4. Google redirects to /api/integrations/:integration/oauth/callback
//! 5. Exchange code for tokens, store the sealed record
//! 6. Later requests get a fresh access token from [`CredentialManager::valid_token`],
//!    refreshing it when it is about to expire
//!
//! Application-wide integrations can skip the handshake when a service account
//! is configured; see [`ServiceAccount`].

mod error;
mod exchange;
mod flow;
mod manager;
mod provider;
mod refresh;
mod service_account;
mod session;

pub use error::CredentialError;
pub use exchange::{
    TokenEndpoint, TokenEndpointError, TokenResponse, DEFAULT_TOKEN_LIFETIME_SECS, JWT_BEARER_GRANT,
};
pub use flow::{AuthorizationFlow, CallbackParams};
pub use manager::{CredentialManager, IntegrationSettings, IntegrationStatus};
pub use provider::build_authorize_url;
pub use refresh::TokenRefresher;
pub use service_account::ServiceAccount;
pub use session::{generate_nonce, OAuthSession, SessionStore};
