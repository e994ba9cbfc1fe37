//! In-flight authorization sessions.
//!
//! One row per `(principal, integration)` binds a pending authorization request to
//! its callback. Rows live in SQLite so every worker process sees the same state.
//! A session is consumed with a single `DELETE … RETURNING`, so a callback can be
//! completed at most once.

use crate::credentials::Integration;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Bytes of entropy in a state nonce
const NONCE_BYTES: usize = 32;

/// Pending authorization attempt awaiting its callback
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthSession {
    pub principal_id: String,
    pub integration: Integration,
    /// Single-use value echoed back by the provider as `state`
    pub state_nonce: String,
    /// Callback URI sent to the provider; the code exchange must reuse it verbatim
    pub redirect_target: String,
    pub requested_scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuthSession {
    /// Creates a session with a fresh nonce.
    pub fn new(
        principal_id: &str,
        integration: Integration,
        redirect_target: &str,
        requested_scopes: Vec<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            integration,
            state_nonce: generate_nonce(),
            redirect_target: redirect_target.to_string(),
            requested_scopes,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

/// Random URL-safe state value (256 bits)
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Shared store of in-flight authorization sessions with TTL expiry
///
/// Expired rows are purged whenever a new session begins; there is no background sweeper.
pub struct SessionStore {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl SessionStore {
    /// Create or open a session store
    ///
    /// # Arguments
    /// * `db_path` - SQLite database file (may be shared with the credential store)
    /// * `ttl_seconds` - How long an unfinished session stays valid (default: 600)
    pub fn open<P: AsRef<Path>>(db_path: P, ttl_seconds: i64) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open session database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_sessions (
                principal_id TEXT NOT NULL,
                integration TEXT NOT NULL,
                state_nonce TEXT NOT NULL,
                redirect_target TEXT NOT NULL,
                requested_scopes TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (principal_id, integration)
            )
            "#,
            [],
        )
        .context("Failed to create oauth_sessions table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::seconds(ttl_seconds),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a session, replacing any earlier attempt for the same key
    pub fn begin(&self, session: &OAuthSession) -> Result<()> {
        let purged = self.purge_expired()?;
        if purged > 0 {
            debug!(purged, "Purged expired OAuth sessions");
        }

        self.lock()?
            .execute(
                r#"
                INSERT INTO oauth_sessions (
                    principal_id, integration, state_nonce, redirect_target,
                    requested_scopes, created_at_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(principal_id, integration) DO UPDATE SET
                    state_nonce = excluded.state_nonce,
                    redirect_target = excluded.redirect_target,
                    requested_scopes = excluded.requested_scopes,
                    created_at_ms = excluded.created_at_ms
                "#,
                params![
                    session.principal_id,
                    session.integration.as_str(),
                    session.state_nonce,
                    session.redirect_target,
                    session.requested_scopes.join(" "),
                    session.created_at.timestamp_millis(),
                ],
            )
            .context("Failed to store OAuth session")?;

        Ok(())
    }

    /// Remove and return the session for a key
    ///
    /// Returns `None` if nothing is pending or the session has expired. Either way
    /// the row is gone afterwards (single-use).
    pub fn take(&self, principal_id: &str, integration: Integration) -> Result<Option<OAuthSession>> {
        let row: Option<(String, String, String, i64)> = self
            .lock()?
            .query_row(
                r#"
                DELETE FROM oauth_sessions
                WHERE principal_id = ?1 AND integration = ?2
                RETURNING state_nonce, redirect_target, requested_scopes, created_at_ms
                "#,
                params![principal_id, integration.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("Failed to consume OAuth session")?;

        let Some((state_nonce, redirect_target, scopes, created_at_ms)) = row else {
            return Ok(None);
        };

        let created_at = Utc
            .timestamp_millis_opt(created_at_ms)
            .single()
            .ok_or_else(|| anyhow!("Stored session has invalid timestamp {}", created_at_ms))?;

        let session = OAuthSession {
            principal_id: principal_id.to_string(),
            integration,
            state_nonce,
            redirect_target,
            requested_scopes: scopes.split_whitespace().map(str::to_string).collect(),
            created_at,
        };

        if session.is_expired_at(Utc::now(), self.ttl) {
            debug!(principal = %principal_id, integration = %integration, "OAuth session expired");
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Drop the pending session for a key, if any
    pub fn discard(&self, principal_id: &str, integration: Integration) -> Result<bool> {
        let rows_affected = self
            .lock()?
            .execute(
                "DELETE FROM oauth_sessions WHERE principal_id = ?1 AND integration = ?2",
                params![principal_id, integration.as_str()],
            )
            .context("Failed to discard OAuth session")?;

        Ok(rows_affected > 0)
    }

    /// Delete sessions older than the TTL
    pub fn purge_expired(&self) -> Result<usize> {
        let cutoff = (Utc::now() - self.ttl).timestamp_millis();
        let purged = self
            .lock()?
            .execute(
                "DELETE FROM oauth_sessions WHERE created_at_ms < ?1",
                params![cutoff],
            )
            .context("Failed to purge expired OAuth sessions")?;

        Ok(purged)
    }

    /// Number of pending sessions (for debugging/monitoring)
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM oauth_sessions", [], |row| row.get(0))
            .context("Failed to count OAuth sessions")?;
        Ok(count as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Session database lock poisoned"))
    }
}
