//! Access token renewal.
//!
//! Refreshes for the same `(principal, integration)` are serialized: the first
//! caller takes a per-key lock and talks to the token endpoint, later callers wait
//! and then pick up the record it stored instead of spending the refresh token again.
//! Service account tokens are minted under the same locks.

use super::exchange::{TokenEndpoint, TokenEndpointError};
use super::service_account::ServiceAccount;
use super::CredentialError;
use crate::config::ClientConfig;
use crate::credentials::{CredentialStore, Integration, TokenRecord};
use crate::scope::{self, parse_scope_list, ScopeSet};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type LockKey = (String, Integration);

/// One holder of a key's lock entry; the last holder removes the entry on drop
struct LockSlot<'a> {
    locks: &'a DashMap<LockKey, Arc<Mutex<()>>>,
    key: LockKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> LockSlot<'a> {
    fn acquire(locks: &'a DashMap<LockKey, Arc<Mutex<()>>>, key: LockKey) -> Self {
        let lock = locks.entry(key.clone()).or_default().value().clone();
        Self { locks, key, lock }
    }
}

impl Drop for LockSlot<'_> {
    fn drop(&mut self) {
        // The map and this slot hold the last two references
        self.locks.remove_if(&self.key, |_, l| Arc::strong_count(l) == 2);
    }
}

pub struct TokenRefresher {
    client: ClientConfig,
    store: Arc<CredentialStore>,
    endpoint: TokenEndpoint,
    expiry_skew: Duration,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl TokenRefresher {
    pub fn new(
        client: ClientConfig,
        store: Arc<CredentialStore>,
        endpoint: TokenEndpoint,
        expiry_skew: Duration,
    ) -> Self {
        Self {
            client,
            store,
            endpoint,
            expiry_skew,
            locks: DashMap::new(),
        }
    }

    /// Return a record whose access token is usable for `required`
    ///
    /// Scope coverage is checked first: a refresh never widens scopes, so an
    /// insufficient grant fails without a network call. An expired record without
    /// a refresh token also fails locally.
    pub async fn ensure_fresh(
        &self,
        integration: Integration,
        record: TokenRecord,
        required: &ScopeSet,
    ) -> Result<TokenRecord, CredentialError> {
        let missing = scope::missing(&record.granted_scopes, required);
        if !missing.is_empty() {
            debug!(
                principal = %record.principal_id,
                integration = %integration,
                missing = %missing.join(" "),
                "Stored grant does not cover required scopes"
            );
            return Err(CredentialError::ScopeInsufficient { missing });
        }

        if !record.is_expired_at(Utc::now(), self.expiry_skew) {
            return Ok(record);
        }

        if !record.can_refresh() {
            return Err(CredentialError::RefreshFailure {
                reason: "access token expired and no refresh token is stored".to_string(),
                revoked: false,
            });
        }

        let slot = LockSlot::acquire(&self.locks, (record.principal_id.clone(), integration));
        let _guard = slot.lock.lock().await;
        self.refresh_locked(integration, &record, required).await
    }

    /// Return a service account token for the key, minting one when the stored
    /// token is missing, expired or too narrow
    pub async fn ensure_service_token(
        &self,
        account: &ServiceAccount,
        principal_id: &str,
        integration: Integration,
        scopes: &[String],
        required: &ScopeSet,
    ) -> Result<TokenRecord, CredentialError> {
        if let Some(record) = self.store.get(principal_id, integration)? {
            if self.usable(&record, required) {
                return Ok(record);
            }
        }

        let slot = LockSlot::acquire(&self.locks, (principal_id.to_string(), integration));
        let _guard = slot.lock.lock().await;

        // Another request minted while we waited for the lock
        if let Some(current) = self.store.get_authoritative(principal_id, integration)? {
            if self.usable(&current, required) {
                debug!(principal = %principal_id, integration = %integration, "Using service account token minted by concurrent request");
                return Ok(current);
            }
        }

        self.mint_locked(account, principal_id, integration, scopes, required)
            .await
    }

    fn usable(&self, record: &TokenRecord, required: &ScopeSet) -> bool {
        !record.is_expired_at(Utc::now(), self.expiry_skew)
            && scope::missing(&record.granted_scopes, required).is_empty()
    }

    async fn mint_locked(
        &self,
        account: &ServiceAccount,
        principal_id: &str,
        integration: Integration,
        scopes: &[String],
        required: &ScopeSet,
    ) -> Result<TokenRecord, CredentialError> {
        let assertion = account.assertion(scopes, Utc::now())?;
        let response = self
            .endpoint
            .jwt_bearer(account.token_url(), &assertion)
            .await
            .map_err(|e| {
                warn!(account = %account.client_email(), integration = %integration, error = %e, "Service account token request failed");
                service_account_error(e)
            })?;
        let expiry = response
            .expiry_from(Utc::now())
            .map_err(service_account_error)?;

        let granted_scopes = match response.scope.as_deref().map(parse_scope_list) {
            Some(granted) if !granted.is_empty() => granted,
            _ => scopes.iter().cloned().collect(),
        };

        let minted = TokenRecord {
            principal_id: principal_id.to_string(),
            access_token: response.access_token,
            refresh_token: None,
            expiry: Some(expiry),
            granted_scopes,
        };

        let missing = scope::missing(&minted.granted_scopes, required);
        if !missing.is_empty() {
            return Err(CredentialError::Configuration(format!(
                "service account {} is not granted {}",
                account.client_email(),
                missing.join(" ")
            )));
        }

        self.store.put(principal_id, integration, &minted)?;

        info!(
            account = %account.client_email(),
            subject = account.subject().unwrap_or("-"),
            integration = %integration,
            expiry = ?minted.expiry,
            "Service account token issued"
        );

        Ok(minted)
    }

    async fn refresh_locked(
        &self,
        integration: Integration,
        stale: &TokenRecord,
        required: &ScopeSet,
    ) -> Result<TokenRecord, CredentialError> {
        let principal_id = stale.principal_id.as_str();
        let now = Utc::now();

        let current = self
            .store
            .get_authoritative(principal_id, integration)?
            .ok_or_else(|| CredentialError::RefreshFailure {
                reason: "token record was removed before it could be refreshed".to_string(),
                revoked: false,
            })?;

        // Another request refreshed while we waited for the lock
        if current.access_token != stale.access_token && !current.is_expired_at(now, self.expiry_skew) {
            debug!(principal = %principal_id, integration = %integration, "Using token refreshed by concurrent request");
            return self.check_scopes(current, required);
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(CredentialError::RefreshFailure {
                reason: "access token expired and no refresh token is stored".to_string(),
                revoked: false,
            });
        };

        let response = self
            .endpoint
            .refresh(&self.client, &refresh_token)
            .await
            .map_err(|e| {
                warn!(principal = %principal_id, integration = %integration, error = %e, "Token refresh failed");
                refresh_error(e)
            })?;

        let granted_scopes = match response.scope.as_deref().map(parse_scope_list) {
            Some(granted) if !granted.is_empty() => granted,
            _ => current.granted_scopes.clone(),
        };

        let expiry = response.expiry_from(Utc::now()).map_err(|e| {
            warn!(principal = %principal_id, integration = %integration, error = %e, "Token refresh returned an unusable lifetime");
            refresh_error(e)
        })?;

        let refreshed = TokenRecord {
            principal_id: principal_id.to_string(),
            access_token: response.access_token.clone(),
            // Providers usually omit the refresh token on renewal; keep the one we have
            refresh_token: response.refresh_token.clone().or(Some(refresh_token)),
            expiry: Some(expiry),
            granted_scopes,
        };

        self.store.put(principal_id, integration, &refreshed)?;

        info!(
            principal = %principal_id,
            integration = %integration,
            expiry = ?refreshed.expiry,
            "Access token refreshed"
        );

        self.check_scopes(refreshed, required)
    }

    fn check_scopes(&self, record: TokenRecord, required: &ScopeSet) -> Result<TokenRecord, CredentialError> {
        let missing = scope::missing(&record.granted_scopes, required);
        if missing.is_empty() {
            Ok(record)
        } else {
            Err(CredentialError::ScopeInsufficient { missing })
        }
    }
}

/// Map a refresh failure onto the lifecycle error kinds
fn refresh_error(err: TokenEndpointError) -> CredentialError {
    match &err {
        TokenEndpointError::Rejected { error, description, .. } => match error.as_str() {
            "invalid_client" | "unauthorized_client" => {
                CredentialError::Configuration(match description {
                    Some(d) => format!("{}: {}", error, d),
                    None => error.clone(),
                })
            }
            "invalid_grant" => CredentialError::RefreshFailure {
                reason: description
                    .clone()
                    .unwrap_or_else(|| "refresh token revoked or expired".to_string()),
                revoked: true,
            },
            _ => CredentialError::RefreshFailure {
                reason: err.to_string(),
                revoked: false,
            },
        },
        TokenEndpointError::Unavailable(_) => CredentialError::TokenEndpoint(err.to_string()),
    }
}

/// A rejected assertion is an operator problem; there is no user to reconnect
fn service_account_error(err: TokenEndpointError) -> CredentialError {
    match &err {
        TokenEndpointError::Rejected { error, description, .. } => {
            CredentialError::Configuration(match description {
                Some(d) => format!("service account grant rejected: {}: {}", error, d),
                None => format!("service account grant rejected: {}", error),
            })
        }
        TokenEndpointError::Unavailable(_) => CredentialError::TokenEndpoint(err.to_string()),
    }
}
