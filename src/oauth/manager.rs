//! Single entry point the web layer calls for delegated credentials.

use super::exchange::TokenEndpoint;
use super::flow::{AuthorizationFlow, CallbackParams};
use super::refresh::TokenRefresher;
use super::service_account::ServiceAccount;
use super::session::SessionStore;
use super::CredentialError;
use crate::config::{ClientConfig, DocketConfig};
use crate::credentials::{CredentialStore, Integration, TokenRecord};
use crate::google::ApiError;
use crate::scope::ScopeSet;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-integration connect settings, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationSettings {
    pub redirect_target: String,
    pub default_scopes: Vec<String>,
}

/// Connection status of one integration, as seen by one user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntegrationStatus {
    pub integration: Integration,
    /// `"user"` or `"application"`
    pub ownership: &'static str,
    pub connected: bool,
    pub granted_scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub can_refresh: bool,
    /// Tokens are minted by the configured service account
    pub service_account: bool,
}

pub struct CredentialManager {
    store: Arc<CredentialStore>,
    sessions: Arc<SessionStore>,
    flow: AuthorizationFlow,
    refresher: TokenRefresher,
    settings: HashMap<Integration, IntegrationSettings>,
    service_account: Option<ServiceAccount>,
}

impl CredentialManager {
    pub fn new(
        config: &DocketConfig,
        client: ClientConfig,
        store: Arc<CredentialStore>,
        sessions: Arc<SessionStore>,
        endpoint: TokenEndpoint,
    ) -> Self {
        let settings = Integration::ALL
            .into_iter()
            .map(|integration| {
                (
                    integration,
                    IntegrationSettings {
                        redirect_target: config.redirect_target(integration),
                        default_scopes: config.default_scopes(integration).to_vec(),
                    },
                )
            })
            .collect();

        let flow = AuthorizationFlow::new(
            client.clone(),
            sessions.clone(),
            store.clone(),
            endpoint.clone(),
        );
        let refresher = TokenRefresher::new(
            client,
            store.clone(),
            endpoint,
            Duration::seconds(config.oauth.expiry_skew_seconds),
        );

        Self {
            store,
            sessions,
            flow,
            refresher,
            settings,
            service_account: None,
        }
    }

    /// Mint application-wide tokens with `account` instead of the consent flow
    pub fn with_service_account(mut self, account: ServiceAccount) -> Self {
        info!(account = %account.client_email(), "Application-wide integrations use a service account");
        self.service_account = Some(account);
        self
    }

    /// Principal that owns the token for `integration` when `user` is acting
    pub fn principal_for(&self, integration: Integration, user: &str) -> String {
        crate::auth::principal_for(integration, user)
    }

    fn settings(&self, integration: Integration) -> Result<&IntegrationSettings, CredentialError> {
        self.settings.get(&integration).ok_or_else(|| {
            CredentialError::Configuration(format!("integration '{}' is not configured", integration))
        })
    }

    fn service_account_for(&self, integration: Integration) -> Option<&ServiceAccount> {
        self.service_account
            .as_ref()
            .filter(|_| integration.is_application_wide())
    }

    /// Stored token for the key, refreshed if needed and checked against `required`
    ///
    /// A record that cannot be refreshed is cleared so the next attempt reports
    /// `NotConnected` instead of retrying a dead refresh token.
    pub async fn valid_token(
        &self,
        principal_id: &str,
        integration: Integration,
        required: &ScopeSet,
    ) -> Result<TokenRecord, CredentialError> {
        if let Some(account) = self.service_account_for(integration) {
            let scopes = &self.settings(integration)?.default_scopes;
            return self
                .refresher
                .ensure_service_token(account, principal_id, integration, scopes, required)
                .await;
        }

        let record = self
            .store
            .get(principal_id, integration)?
            .ok_or(CredentialError::NotConnected)?;

        match self.refresher.ensure_fresh(integration, record, required).await {
            Err(err @ CredentialError::RefreshFailure { .. }) => {
                warn!(
                    principal = %principal_id,
                    integration = %integration,
                    error = %err,
                    "Clearing credentials that can no longer be refreshed"
                );
                self.store.clear(principal_id, integration)?;
                Err(err)
            }
            result => result,
        }
    }

    /// Provider URL that (re)connects an integration
    ///
    /// Requests the configured defaults plus anything already granted plus
    /// `extra_scopes`, so reconnecting never narrows an existing grant.
    pub fn connect_url(
        &self,
        principal_id: &str,
        integration: Integration,
        extra_scopes: &[String],
    ) -> Result<String, CredentialError> {
        let settings = self.settings(integration)?;

        let mut scopes = settings.default_scopes.clone();
        if let Some(existing) = self.store.get(principal_id, integration)? {
            scopes.extend(existing.granted_scopes);
        }
        scopes.extend(extra_scopes.iter().cloned());

        self.flow
            .start(principal_id, integration, &scopes, &settings.redirect_target)
    }

    pub async fn finish_connect(
        &self,
        principal_id: &str,
        integration: Integration,
        params: &CallbackParams,
    ) -> Result<TokenRecord, CredentialError> {
        self.flow.complete(principal_id, integration, params).await
    }

    /// Forget stored credentials and any pending connect attempt
    ///
    /// Returns whether a token record existed.
    pub fn disconnect(&self, principal_id: &str, integration: Integration) -> Result<bool, CredentialError> {
        let removed = self.store.clear(principal_id, integration)?;
        self.sessions.discard(principal_id, integration)?;

        info!(principal = %principal_id, integration = %integration, removed, "Integration disconnected");
        Ok(removed)
    }

    /// React to a failed provider API call made with a stored token
    ///
    /// A 401 means the provider no longer honors the token, so the record is
    /// cleared. Returns whether a record was removed.
    pub fn report_api_error(
        &self,
        principal_id: &str,
        integration: Integration,
        err: &ApiError,
    ) -> Result<bool, CredentialError> {
        if !matches!(err, ApiError::Unauthenticated(_)) {
            return Ok(false);
        }

        warn!(
            principal = %principal_id,
            integration = %integration,
            "Provider rejected access token; clearing credentials"
        );
        Ok(self.store.clear(principal_id, integration)?)
    }

    /// Status of every integration for `user`
    pub fn status(&self, user: &str) -> Result<Vec<IntegrationStatus>, CredentialError> {
        Integration::ALL
            .into_iter()
            .map(|integration| -> Result<IntegrationStatus, CredentialError> {
                let owner = self.principal_for(integration, user);
                let record = self.store.get(&owner, integration)?;
                let service_account = self.service_account_for(integration).is_some();
                Ok(IntegrationStatus {
                    integration,
                    ownership: if integration.is_application_wide() {
                        "application"
                    } else {
                        "user"
                    },
                    connected: service_account || record.is_some(),
                    granted_scopes: record
                        .as_ref()
                        .map(|r| r.granted_scopes.iter().cloned().collect())
                        .unwrap_or_default(),
                    expiry: record.as_ref().and_then(|r| r.expiry),
                    can_refresh: service_account
                        || record.as_ref().is_some_and(TokenRecord::can_refresh),
                    service_account,
                })
            })
            .collect()
    }
}
