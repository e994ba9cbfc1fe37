// HTTP API: integration connect flow plus the calendar and drive views

pub mod calendar;
pub mod drive;
pub mod error;
pub mod integrations;

pub use calendar::create_calendar_router;
pub use drive::create_drive_router;
pub use error::{AppError, ErrorResponse};
pub use integrations::create_integrations_router;

use crate::auth::extract_principal;
use crate::credentials::{Integration, TokenRecord};
use crate::google::{ApiError, ApiOperation, GoogleApi};
use crate::oauth::CredentialManager;
use axum::{http::HeaderMap, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state for every route
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CredentialManager>,
    pub google: GoogleApi,
    pub auth_enabled: bool,
    pub default_calendar_id: String,
    pub max_upload_bytes: usize,
}

/// Create the full API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(create_integrations_router(state.clone()))
        .merge(create_calendar_router(state.clone()))
        .merge(create_drive_router(state))
        .layer(TraceLayer::new_for_http())
}

impl AppState {
    /// Principal of the user making the request
    pub(crate) fn caller(&self, headers: &HeaderMap) -> Result<String, AppError> {
        Ok(extract_principal(headers, self.auth_enabled)?)
    }

    /// Owning principal and a usable token for `operation`
    pub(crate) async fn authorize(
        &self,
        user: &str,
        operation: ApiOperation,
    ) -> Result<(String, TokenRecord), AppError> {
        let integration = operation.integration();
        let principal = self.manager.principal_for(integration, user);
        let token = self
            .manager
            .valid_token(&principal, integration, &operation.required_scopes())
            .await
            .map_err(|e| AppError::from_credential(integration, e))?;
        Ok((principal, token))
    }

    /// Report a failed provider call and turn it into a response
    pub(crate) fn api_failure(&self, principal: &str, integration: Integration, err: ApiError) -> AppError {
        if let Err(e) = self.manager.report_api_error(principal, integration, &err) {
            error!(principal = %principal, integration = %integration, error = %e, "Failed to clear rejected credentials");
        }
        AppError::from_api(integration, err)
    }
}
