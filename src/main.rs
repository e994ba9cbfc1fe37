use anyhow::{Context, Result};
use docket::api::{create_router, AppState};
use docket::config::{load_config, resolve_client_config, resolve_service_account, DocketConfig};
use docket::credentials::{CredentialStore, MasterKey};
use docket::google::GoogleApi;
use docket::oauth::{CredentialManager, ServiceAccount, SessionStore, TokenEndpoint};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docket=info".into()),
        )
        .init();

    info!("Docket starting...");

    let mut config = match std::env::var("DOCKET_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => DocketConfig::default(),
    };
    config.apply_env();

    let client = resolve_client_config(&config.oauth, |name| std::env::var(name).ok())
        .context("Failed to resolve OAuth client")?;
    let service_account = resolve_service_account(&config, |name| std::env::var(name).ok())
        .context("Failed to resolve Drive service account")?
        .map(ServiceAccount::new)
        .transpose()
        .context("Failed to load Drive service account key")?;

    let encryption_key = std::env::var("DOCKET_ENCRYPTION_KEY")
        .context("DOCKET_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let master_key = MasterKey::from_base64(&encryption_key)?;

    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.storage.database_path.display(),
        auth_enabled = config.server.auth_enabled,
        "Configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::open(
            &config.storage.database_path,
            master_key,
            Duration::from_secs(config.storage.cache_ttl_seconds),
        )
        .context("Failed to initialize credential store")?,
    );
    let sessions = Arc::new(
        SessionStore::open(&config.storage.database_path, config.oauth.session_ttl_seconds)
            .context("Failed to initialize session store")?,
    );
    let endpoint = TokenEndpoint::new(Duration::from_secs(config.oauth.http_timeout_seconds))?;
    let mut manager = CredentialManager::new(&config, client, store, sessions, endpoint);
    if let Some(account) = service_account {
        manager = manager.with_service_account(account);
    }
    let manager = Arc::new(manager);

    let state = AppState {
        manager,
        google: GoogleApi::from_config(&config)?,
        auth_enabled: config.server.auth_enabled,
        default_calendar_id: config.calendar.default_calendar_id.clone(),
        max_upload_bytes: config.drive.max_upload_bytes,
    };

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Docket API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Docket API server error")?;

    info!("Docket stopped");
    Ok(())
}
