//! Service account credentials for application-wide integrations.
//!
//! A service account signs its own RS256 assertion and trades it at the token
//! endpoint (JWT-bearer grant), so Drive works without anyone running the
//! consent flow. With `subject` set the account acts as that Workspace user.

use super::CredentialError;
use crate::config::ServiceAccountConfig;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::fmt;

/// Longest assertion lifetime Google accepts
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize, PartialEq))]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sub: Option<String>,
}

pub struct ServiceAccount {
    client_email: String,
    key_id: Option<String>,
    signing_key: EncodingKey,
    token_url: String,
    subject: Option<String>,
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("token_url", &self.token_url)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    /// Parse the private key once so a bad key fails at startup
    pub fn new(config: ServiceAccountConfig) -> Result<Self, CredentialError> {
        let signing_key = EncodingKey::from_rsa_pem(config.key.private_key.as_bytes()).map_err(|e| {
            CredentialError::Configuration(format!(
                "service account {} has an unusable private key: {}",
                config.key.client_email, e
            ))
        })?;

        Ok(Self {
            client_email: config.key.client_email,
            key_id: config.key.private_key_id,
            signing_key,
            token_url: config.token_url,
            subject: config.subject,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Signed assertion asking for `scopes`, issued at `now`
    pub fn assertion(&self, scopes: &[String], now: DateTime<Utc>) -> Result<String, CredentialError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: scopes.join(" "),
            aud: self.token_url.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
            sub: self.subject.clone(),
        };

        jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(|e| {
            CredentialError::Configuration(format!("failed to sign service account assertion: {}", e))
        })
    }
}
