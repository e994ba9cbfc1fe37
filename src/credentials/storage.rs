//! Token record storage using SQLite, with a read-through cache.
//!
//! The table is authoritative. The cache only shortens repeated reads within one
//! process and is bypassed by [`CredentialStore::get_authoritative`].

use super::encryption::{MasterKey, Sealed};
use super::{Integration, TokenRecord};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type StoreKey = (String, Integration);

struct CachedRecord {
    record: TokenRecord,
    fetched_at: Instant,
}

/// Encrypted token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE token_records (
///     principal_id TEXT NOT NULL,
///     integration TEXT NOT NULL,
///     sealed_record TEXT NOT NULL,   -- AES-256-GCM sealed JSON TokenRecord
///     nonce TEXT NOT NULL,
///     created_at TEXT NOT NULL,      -- RFC 3339
///     updated_at TEXT NOT NULL,      -- RFC 3339
///     PRIMARY KEY (principal_id, integration)
/// );
/// ```
///
/// A row that cannot be opened or parsed reads as absent and is reported once per key.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    key: MasterKey,
    cache: DashMap<StoreKey, CachedRecord>,
    cache_ttl: Duration,
    reported_unreadable: DashMap<StoreKey, ()>,
}

impl CredentialStore {
    /// Creates or opens a store. A zero `cache_ttl` disables caching.
    pub fn open<P: AsRef<Path>>(db_path: P, key: MasterKey, cache_ttl: Duration) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credential database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS token_records (
                principal_id TEXT NOT NULL,
                integration TEXT NOT NULL,
                sealed_record TEXT NOT NULL,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (principal_id, integration)
            )
            "#,
            [],
        )
        .context("Failed to create token_records table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            key,
            cache: DashMap::new(),
            cache_ttl,
            reported_unreadable: DashMap::new(),
        })
    }

    /// Returns the record for a key, serving from cache while it is fresh.
    pub fn get(&self, principal_id: &str, integration: Integration) -> Result<Option<TokenRecord>> {
        let key = (principal_id.to_string(), integration);

        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(Some(entry.record.clone()));
            }
        }

        self.load(key)
    }

    /// Reads straight from the table, refreshing the cache entry.
    pub fn get_authoritative(
        &self,
        principal_id: &str,
        integration: Integration,
    ) -> Result<Option<TokenRecord>> {
        self.load((principal_id.to_string(), integration))
    }

    /// Inserts or replaces the record for a key.
    pub fn put(&self, principal_id: &str, integration: Integration, record: &TokenRecord) -> Result<()> {
        if record.principal_id != principal_id {
            bail!(
                "Token record belongs to principal '{}', refusing to store it under '{}'",
                record.principal_id,
                principal_id
            );
        }

        let plaintext = serde_json::to_vec(record).context("Failed to serialize token record")?;
        let sealed = self
            .key
            .seal(&plaintext)
            .context("Failed to encrypt token record")?;
        let now = Utc::now().to_rfc3339();

        self.lock()?
            .execute(
                r#"
                INSERT INTO token_records (
                    principal_id, integration, sealed_record, nonce, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(principal_id, integration) DO UPDATE SET
                    sealed_record = excluded.sealed_record,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at
                "#,
                params![
                    principal_id,
                    integration.as_str(),
                    sealed.ciphertext,
                    sealed.nonce,
                    now,
                ],
            )
            .context("Failed to store token record")?;

        let key = (principal_id.to_string(), integration);
        self.reported_unreadable.remove(&key);
        self.remember(key, record);

        debug!(principal = %principal_id, integration = %integration, "Token record stored");
        Ok(())
    }

    /// Deletes the record for a key.
    ///
    /// # Returns
    /// * `Ok(true)` - A record was deleted
    /// * `Ok(false)` - Nothing was stored
    pub fn clear(&self, principal_id: &str, integration: Integration) -> Result<bool> {
        let key = (principal_id.to_string(), integration);
        self.cache.remove(&key);

        let rows_affected = self
            .lock()?
            .execute(
                "DELETE FROM token_records WHERE principal_id = ?1 AND integration = ?2",
                params![principal_id, integration.as_str()],
            )
            .context("Failed to delete token record")?;

        Ok(rows_affected > 0)
    }

    fn load(&self, key: StoreKey) -> Result<Option<TokenRecord>> {
        let row: Option<(String, String)> = self
            .lock()?
            .query_row(
                "SELECT sealed_record, nonce FROM token_records WHERE principal_id = ?1 AND integration = ?2",
                params![key.0, key.1.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read token record")?;

        let Some((ciphertext, nonce)) = row else {
            self.cache.remove(&key);
            return Ok(None);
        };

        match self.decode(&key, &Sealed { ciphertext, nonce }) {
            Ok(record) => {
                self.remember(key, &record);
                Ok(Some(record))
            }
            Err(e) => {
                self.cache.remove(&key);
                if self.reported_unreadable.insert(key.clone(), ()).is_none() {
                    warn!(
                        principal = %key.0,
                        integration = %key.1,
                        error = %e,
                        "Stored token record is unreadable, treating it as absent"
                    );
                }
                Ok(None)
            }
        }
    }

    fn decode(&self, key: &StoreKey, sealed: &Sealed) -> Result<TokenRecord> {
        let plaintext = self.key.open(sealed)?;
        let record: TokenRecord =
            serde_json::from_slice(&plaintext).context("Token record is not valid JSON")?;

        if record.principal_id != key.0 {
            bail!(
                "Token record is stamped with principal '{}'",
                record.principal_id
            );
        }

        Ok(record)
    }

    fn remember(&self, key: StoreKey, record: &TokenRecord) {
        if self.cache_ttl.is_zero() {
            return;
        }
        self.cache.insert(
            key,
            CachedRecord {
                record: record.clone(),
                fetched_at: Instant::now(),
            },
        );
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }
}
