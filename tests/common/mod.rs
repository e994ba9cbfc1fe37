// Shared harness: the full router wired to one mockito server that plays
// both the OAuth token endpoint and the Calendar/Drive APIs.
#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use docket::api::{create_router, AppState};
use docket::config::{ClientConfig, DocketConfig, ServiceAccountConfig, ServiceAccountKey};
use docket::credentials::{CredentialStore, Integration, MasterKey, TokenRecord};
use docket::google::{GoogleApi, GoogleEndpoints};
use docket::oauth::{CredentialManager, ServiceAccount, SessionStore, TokenEndpoint};
use docket::scope::google_scope;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub server: mockito::ServerGuard,
    pub store: Arc<CredentialStore>,
    pub router: Router,
}

pub const SERVICE_ACCOUNT_EMAIL: &str = "docket@bufete.iam.gserviceaccount.com";
pub const IMPERSONATED_USER: &str = "archivo@bufete.example.com";

pub async fn test_app() -> TestApp {
    build_app(false).await
}

/// Drive tokens come from a service account acting as [`IMPERSONATED_USER`]
pub async fn test_app_with_service_account() -> TestApp {
    build_app(true).await
}

async fn build_app(service_account: bool) -> TestApp {
    let server = mockito::Server::new_async().await;

    let mut config = DocketConfig::default();
    config.server.public_base_url = "https://docket.example.com".to_string();

    let client = ClientConfig {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        auth_url: format!("{}/auth", server.url()),
        token_url: format!("{}/token", server.url()),
    };
    let store = Arc::new(
        CredentialStore::open(
            ":memory:",
            MasterKey::from_bytes(&[7u8; 32]).unwrap(),
            std::time::Duration::from_secs(60),
        )
        .unwrap(),
    );
    let sessions = Arc::new(SessionStore::open(":memory:", 600).unwrap());
    let mut manager = CredentialManager::new(
        &config,
        client,
        store.clone(),
        sessions,
        TokenEndpoint::new(std::time::Duration::from_secs(5)).unwrap(),
    );
    if service_account {
        let account = ServiceAccount::new(ServiceAccountConfig {
            key: ServiceAccountKey {
                key_type: Some("service_account".to_string()),
                client_email: SERVICE_ACCOUNT_EMAIL.to_string(),
                private_key: include_str!("../data/service_account_key.pem").to_string(),
                private_key_id: Some("key-1".to_string()),
                token_uri: None,
            },
            token_url: format!("{}/token", server.url()),
            subject: Some(IMPERSONATED_USER.to_string()),
        })
        .unwrap();
        manager = manager.with_service_account(account);
    }
    let manager = Arc::new(manager);
    let google = GoogleApi::new(
        GoogleEndpoints {
            calendar: server.url(),
            drive: server.url(),
            drive_upload: server.url(),
        },
        std::time::Duration::from_secs(5),
    )
    .unwrap();

    let router = create_router(AppState {
        manager,
        google,
        auth_enabled: true,
        default_calendar_id: "primary".to_string(),
        max_upload_bytes: 1024 * 1024,
    });

    TestApp {
        server,
        store,
        router,
    }
}

pub fn scopes(short: &[&str]) -> docket::scope::ScopeSet {
    short.iter().map(|s| google_scope(s)).collect()
}

/// Stores a token that is valid for another hour
pub fn connect(app: &TestApp, principal: &str, integration: Integration, access: &str, granted: &[&str]) {
    let record = TokenRecord {
        principal_id: principal.to_string(),
        access_token: access.to_string(),
        refresh_token: Some(format!("{}-refresh", access)),
        expiry: Some(Utc::now() + Duration::hours(1)),
        granted_scopes: scopes(granted),
    };
    app.store.put(principal, integration, &record).unwrap();
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    principal: Option<&str>,
    content_type: Option<&str>,
    body: Body,
) -> TestResponse {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(principal) = principal {
        request = request.header("Authorization", format!("Bearer {}", principal));
    }
    if let Some(content_type) = content_type {
        request = request.header("Content-Type", content_type);
    }

    let response = app
        .router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &TestApp, uri: &str, principal: &str) -> TestResponse {
    send(app, "GET", uri, Some(principal), None, Body::empty()).await
}

pub async fn post_json(app: &TestApp, uri: &str, principal: &str, body: serde_json::Value) -> TestResponse {
    send(
        app,
        "POST",
        uri,
        Some(principal),
        Some("application/json"),
        Body::from(serde_json::to_vec(&body).unwrap()),
    )
    .await
}
