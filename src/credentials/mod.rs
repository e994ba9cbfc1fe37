//! Encrypted persistence for delegated OAuth token records.
//!
//! Every principal owns at most one [`TokenRecord`] per [`Integration`]. Records
//! are sealed as a whole with AES-256-GCM and kept in SQLite, with a short-lived
//! in-process cache in front of the table.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - get / put / clear per key             │
//! │  - read-through cache (TTL)              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!       (seal)               (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       MasterKey (AES-256-GCM)            │
//! │  - fresh nonce per write                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite token_records               │
//! │  - authoritative copy                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use docket::credentials::{CredentialStore, Integration, MasterKey, TokenRecord};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = MasterKey::from_base64(&std::env::var("DOCKET_ENCRYPTION_KEY")?)?;
//! let store = CredentialStore::open("docket.db", key, std::time::Duration::from_secs(60))?;
//!
//! let record = TokenRecord {
//!     principal_id: "42".to_string(),
//!     access_token: "ya29.access".to_string(),
//!     refresh_token: Some("1//refresh".to_string()),
//!     expiry: Some(Utc::now() + Duration::hours(1)),
//!     granted_scopes: ["https://www.googleapis.com/auth/calendar.readonly".to_string()]
//!         .into_iter()
//!         .collect(),
//! };
//! store.put("42", Integration::Calendar, &record)?;
//!
//! if let Some(found) = store.get("42", Integration::Calendar)? {
//!     println!("expires at {:?}", found.expiry);
//! }
//!
//! store.clear("42", Integration::Calendar)?;
//! # Ok(())
//! # }
//! ```

use crate::scope::ScopeSet;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod encryption;
mod storage;

pub use encryption::{MasterKey, Sealed};
pub use storage::CredentialStore;

/// Principal that owns application-wide integrations (one token for the whole office).
pub const APPLICATION_PRINCIPAL: &str = "app";

/// External API domain with its own scopes and token storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    /// Per-user calendar access.
    Calendar,
    /// Office-wide file storage, owned by [`APPLICATION_PRINCIPAL`].
    Drive,
}

impl Integration {
    pub const ALL: [Integration; 2] = [Integration::Calendar, Integration::Drive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Integration::Calendar => "calendar",
            Integration::Drive => "drive",
        }
    }

    /// Whether a single token serves every user of the application.
    pub fn is_application_wide(&self) -> bool {
        matches!(self, Integration::Drive)
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path segment or stored column names no known integration.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownIntegration(pub String);

impl fmt::Display for UnknownIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown integration '{}'", self.0)
    }
}

impl std::error::Error for UnknownIntegration {}

impl FromStr for Integration {
    type Err = UnknownIntegration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(Integration::Calendar),
            "drive" => Ok(Integration::Drive),
            other => Err(UnknownIntegration(other.to_string())),
        }
    }
}

/// Delegated credentials held for one principal and one integration.
///
/// A record without `refresh_token` cannot be renewed once `access_token`
/// expires; only a new authorization-code flow replaces it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Owning user id, or [`APPLICATION_PRINCIPAL`]
    pub principal_id: String,

    /// Short-lived bearer credential
    pub access_token: String,

    /// Long-lived credential used to mint new access tokens
    pub refresh_token: Option<String>,

    /// When `access_token` stops being accepted; `None` means valid until a call fails
    pub expiry: Option<DateTime<Utc>>,

    /// Scopes the provider actually granted
    pub granted_scopes: ScopeSet,
}

impl TokenRecord {
    /// True once `expiry` is within `skew` of `now`. Records without expiry never expire here.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + skew,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("principal_id", &self.principal_id)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .field("granted_scopes", &self.granted_scopes)
            .finish()
    }
}
