pub mod client;
pub use client::{
    resolve_client_config, resolve_service_account, ClientConfig, ClientSource,
    ServiceAccountConfig, ServiceAccountKey,
};

use crate::credentials::Integration;
use crate::scope::google_scope;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Complete docket configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DocketConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub drive: DriveConfig,
}

/// HTTP listener and public URL
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Absolute base the provider redirects back to (no trailing slash)
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Require `Authorization: Bearer <principal>` from the fronting web layer
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            auth_enabled: default_auth_enabled(),
        }
    }
}

/// Token and session database
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// In-process token cache lifetime; 0 disables the cache
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("docket.db")
}

fn default_cache_ttl() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

/// OAuth client sources and lifecycle timings
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Inline client secrets JSON
    #[serde(default)]
    pub client_json: Option<String>,
    /// Path to a client secrets JSON file
    #[serde(default)]
    pub client_file: Option<PathBuf>,
    /// Overrides the authorization endpoint from the client JSON
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Overrides the token endpoint from the client JSON
    #[serde(default)]
    pub token_url: Option<String>,
    /// How long an unfinished authorization attempt stays valid
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: i64,
    /// Tokens expiring within this window are refreshed early
    #[serde(default = "default_expiry_skew")]
    pub expiry_skew_seconds: i64,
    /// Upper bound on any single provider call
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_session_ttl() -> i64 {
    600
}

fn default_expiry_skew() -> i64 {
    60
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_json: None,
            client_file: None,
            auth_url: None,
            token_url: None,
            session_ttl_seconds: default_session_ttl(),
            expiry_skew_seconds: default_expiry_skew(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

/// Per-user calendar integration
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_scopes")]
    pub scopes: Vec<String>,
    /// Callback URL registered with the provider; derived from `public_base_url` when unset
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_calendar_id")]
    pub default_calendar_id: String,
    #[serde(default = "default_calendar_api")]
    pub api_base_url: String,
}

fn default_calendar_scopes() -> Vec<String> {
    vec![google_scope("calendar.readonly")]
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_calendar_api() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            scopes: default_calendar_scopes(),
            redirect_uri: None,
            default_calendar_id: default_calendar_id(),
            api_base_url: default_calendar_api(),
        }
    }
}

/// Office-wide file storage integration
#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_drive_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_drive_api")]
    pub api_base_url: String,
    #[serde(default = "default_drive_upload_api")]
    pub upload_base_url: String,
    #[serde(default)]
    pub shared_drive_id: Option<String>,
    /// Treat `shared_drive_id` as a shared drive (adds all-drives query parameters)
    #[serde(default)]
    pub is_shared_drive: bool,
    /// Largest request body accepted by the upload route
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Inline service account key JSON
    #[serde(default)]
    pub service_account_json: Option<String>,
    /// Path to a service account key file
    #[serde(default)]
    pub service_account_file: Option<PathBuf>,
    /// Workspace user the service account acts as (domain-wide delegation)
    #[serde(default)]
    pub impersonate_email: Option<String>,
}

fn default_drive_scopes() -> Vec<String> {
    vec![google_scope("drive")]
}

fn default_drive_api() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_drive_upload_api() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            scopes: default_drive_scopes(),
            redirect_uri: None,
            api_base_url: default_drive_api(),
            upload_base_url: default_drive_upload_api(),
            shared_drive_id: None,
            is_shared_drive: false,
            max_upload_bytes: default_max_upload_bytes(),
            service_account_json: None,
            service_account_file: None,
            impersonate_email: None,
        }
    }
}

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            oauth: OAuthConfig::default(),
            calendar: CalendarConfig::default(),
            drive: DriveConfig::default(),
        }
    }
}

impl DocketConfig {
    /// Applies `DOCKET_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary lookup, falling back to current values
    /// when a variable is unset or does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCKET_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("DOCKET_PUBLIC_BASE_URL") {
            self.server.public_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(b) = lookup("DOCKET_AUTH_ENABLED").and_then(|v| parse_flag(&v)) {
            self.server.auth_enabled = b;
        }
        if let Some(v) = lookup("DOCKET_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(n) = lookup("DOCKET_CACHE_TTL_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
            self.storage.cache_ttl_seconds = n;
        }
        if let Some(true) = lookup("DOCKET_CALENDAR_READ_WRITE").and_then(|v| parse_flag(&v)) {
            self.calendar.scopes = vec![google_scope("calendar.events")];
        }
        if let Some(v) = lookup("DOCKET_CALENDAR_REDIRECT_URI") {
            self.calendar.redirect_uri = Some(v);
        }
        if let Some(v) = lookup("DOCKET_DRIVE_REDIRECT_URI") {
            self.drive.redirect_uri = Some(v);
        }
        if let Some(v) = lookup("DOCKET_SHARED_DRIVE_ID") {
            self.drive.shared_drive_id = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(b) = lookup("DOCKET_IS_SHARED_DRIVE").and_then(|v| parse_flag(&v)) {
            self.drive.is_shared_drive = b;
        }
        if let Some(v) = lookup("DOCKET_DRIVE_IMPERSONATE_EMAIL") {
            self.drive.impersonate_email = Some(v).filter(|s| !s.trim().is_empty());
        }
    }

    /// Callback URL promised to the provider for an integration.
    pub fn redirect_target(&self, integration: Integration) -> String {
        let configured = match integration {
            Integration::Calendar => self.calendar.redirect_uri.as_deref(),
            Integration::Drive => self.drive.redirect_uri.as_deref(),
        };
        match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(uri) => uri.to_string(),
            None => format!(
                "{}/api/integrations/{}/oauth/callback",
                self.server.public_base_url.trim_end_matches('/'),
                integration
            ),
        }
    }

    /// Scopes requested by default when connecting an integration.
    pub fn default_scopes(&self, integration: Integration) -> &[String] {
        match integration {
            Integration::Calendar => &self.calendar.scopes,
            Integration::Drive => &self.drive.scopes,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<DocketConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: DocketConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config)
}
