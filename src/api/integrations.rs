//! Integration status and connect/disconnect endpoints.
//!
//! OAuth flow as seen by the browser:
//! 1. GET /api/integrations/:integration/oauth/start → 307 to Google
//! 2. Google redirects back to /api/integrations/:integration/oauth/callback
//! 3. The callback stores the token and reports success as JSON

use super::{AppError, AppState};
use crate::credentials::Integration;
use crate::oauth::{CallbackParams, IntegrationStatus};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// List integrations response
#[derive(Serialize)]
pub struct ListIntegrationsResponse {
    pub integrations: Vec<IntegrationStatus>,
}

/// Query parameters for the start route
#[derive(Deserialize, Default)]
pub struct StartParams {
    /// Extra space-separated scopes to request on top of the defaults
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
    pub integration: Integration,
    pub scopes: Vec<String>,
}

/// Response for DELETE /api/integrations/:integration/connection
#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub removed: bool,
}

/// Create integrations API router
pub fn create_integrations_router(state: AppState) -> Router {
    Router::new()
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/:integration/oauth/start", get(oauth_start))
        .route("/api/integrations/:integration/oauth/callback", get(oauth_callback))
        .route("/api/integrations/:integration/connection", delete(disconnect))
        .with_state(Arc::new(state))
}

fn parse_integration(name: &str) -> Result<Integration, AppError> {
    name.parse().map_err(|_| {
        warn!(integration = %name, "Unknown integration");
        AppError::NotFound(format!("Integration '{}' not found", name))
    })
}

/// GET /api/integrations - Connection status of every integration
async fn list_integrations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ListIntegrationsResponse>, AppError> {
    let user = state.caller(&headers)?;
    debug!(principal = %user, "Listing integrations");

    let integrations = state.manager.status(&user).map_err(|e| {
        error!(principal = %user, error = %e, "Failed to read integration status");
        AppError::ServerError("Credential storage unavailable".to_string())
    })?;

    Ok(Json(ListIntegrationsResponse { integrations }))
}

/// GET /api/integrations/:integration/oauth/start
///
/// Redirects the browser to the provider's consent page. Requests the
/// integration's default scopes, whatever is already granted, and any
/// `scope` passed in the query.
async fn oauth_start(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<StartParams>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let integration = parse_integration(&name)?;
    let user = state.caller(&headers)?;
    let principal = state.manager.principal_for(integration, &user);

    let extra: Vec<String> = params
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let url = state
        .manager
        .connect_url(&principal, integration, &extra)
        .map_err(|e| AppError::from_credential(integration, e))?;

    Ok(Redirect::temporary(&url))
}

/// GET /api/integrations/:integration/oauth/callback
///
/// Completes the flow for the calling principal. The session is single-use;
/// a replayed or forged callback is rejected and must restart from `start`.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(callback): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Json<ConnectResponse>, AppError> {
    let integration = parse_integration(&name)?;
    let user = state.caller(&headers)?;
    let principal = state.manager.principal_for(integration, &user);

    let record = state
        .manager
        .finish_connect(&principal, integration, &callback)
        .await
        .map_err(|e| AppError::from_credential(integration, e))?;

    info!(principal = %principal, integration = %integration, "Integration connected");

    Ok(Json(ConnectResponse {
        success: true,
        message: format!("Successfully connected {}", integration),
        integration,
        scopes: record.granted_scopes.into_iter().collect(),
    }))
}

/// DELETE /api/integrations/:integration/connection
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let integration = parse_integration(&name)?;
    let user = state.caller(&headers)?;
    let principal = state.manager.principal_for(integration, &user);

    let removed = state
        .manager
        .disconnect(&principal, integration)
        .map_err(|e| AppError::from_credential(integration, e))?;

    Ok(Json(DisconnectResponse {
        success: true,
        removed,
    }))
}
