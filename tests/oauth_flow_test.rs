// Integration tests for the connect flow under /api/integrations

mod common;

use axum::{body::Body, http::StatusCode};
use common::{connect, get, send, test_app, TestApp};
use docket::credentials::{Integration, APPLICATION_PRINCIPAL};
use std::collections::HashMap;

/// Query parameters of the provider URL the start route redirected to
fn consent_params(location: &str) -> HashMap<String, String> {
    let (_, query) = location.split_once('?').unwrap();
    serde_urlencoded::from_str(query).unwrap()
}

async fn start(app: &TestApp, integration: &str, principal: &str) -> String {
    let response = get(
        app,
        &format!("/api/integrations/{}/oauth/start", integration),
        principal,
    )
    .await;
    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers["location"].to_str().unwrap().to_string();
    consent_params(&location)["state"].clone()
}

async fn callback(app: &TestApp, integration: &str, principal: &str, query: &str) -> common::TestResponse {
    get(
        app,
        &format!("/api/integrations/{}/oauth/callback?{}", integration, query),
        principal,
    )
    .await
}

/// Start redirects to the consent page with offline access requested.
#[tokio::test]
async fn test_start_redirects_to_consent_page() {
    let app = test_app().await;

    let response = get(&app, "/api/integrations/calendar/oauth/start", "42").await;

    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers["location"].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/auth?", app.server.url())));

    let params = consent_params(location);
    assert_eq!(params["client_id"], "client-id");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["access_type"], "offline");
    assert_eq!(params["prompt"], "consent");
    assert_eq!(
        params["redirect_uri"],
        "https://docket.example.com/api/integrations/calendar/oauth/callback"
    );
    assert_eq!(
        params["scope"],
        "https://www.googleapis.com/auth/calendar.readonly"
    );
    assert!(params["state"].len() >= 32);
}

/// Extra scopes from the query string are added to the defaults.
#[tokio::test]
async fn test_start_requests_extra_scope() {
    let app = test_app().await;

    let response = get(
        &app,
        "/api/integrations/calendar/oauth/start?scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fcalendar.events",
        "42",
    )
    .await;

    let params = consent_params(response.headers["location"].to_str().unwrap());
    let requested: Vec<&str> = params["scope"].split(' ').collect();
    assert!(requested.contains(&"https://www.googleapis.com/auth/calendar.readonly"));
    assert!(requested.contains(&"https://www.googleapis.com/auth/calendar.events"));
}

/// A full round trip stores the token and reports the integration connected.
#[tokio::test]
async fn test_callback_connects_calendar() {
    let mut app = test_app().await;
    let state = start(&app, "calendar", "42").await;

    let token = app
        .server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded("code".into(), "auth-code".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"access-1","refresh_token":"refresh-1","expires_in":3600,
                "scope":"https://www.googleapis.com/auth/calendar.readonly","token_type":"Bearer"}"#,
        )
        .create_async()
        .await;

    let response = callback(&app, "calendar", "42", &format!("code=auth-code&state={}", state)).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["integration"], "calendar");
    assert_eq!(
        body["scopes"][0],
        "https://www.googleapis.com/auth/calendar.readonly"
    );
    token.assert_async().await;

    let stored = app.store.get("42", Integration::Calendar).unwrap().unwrap();
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));

    let status = get(&app, "/api/integrations", "42").await.json();
    let integrations = status["integrations"].as_array().unwrap();
    assert_eq!(integrations[0]["integration"], "calendar");
    assert_eq!(integrations[0]["ownership"], "user");
    assert_eq!(integrations[0]["connected"], true);
    assert_eq!(integrations[0]["can_refresh"], true);
    assert_eq!(integrations[1]["integration"], "drive");
    assert_eq!(integrations[1]["ownership"], "application");
    assert_eq!(integrations[1]["connected"], false);
}

/// Without a refresh token the grant is discarded and the user must reconnect.
#[tokio::test]
async fn test_callback_without_refresh_token_stores_nothing() {
    let mut app = test_app().await;
    let state = start(&app, "calendar", "42").await;

    app.server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"access-1","expires_in":3600}"#)
        .create_async()
        .await;

    let response = callback(&app, "calendar", "42", &format!("code=auth-code&state={}", state)).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json()["reconnect_url"],
        "/api/integrations/calendar/oauth/start"
    );
    assert!(app.store.get("42", Integration::Calendar).unwrap().is_none());
}

/// A callback can only be used once.
#[tokio::test]
async fn test_callback_replay_rejected() {
    let mut app = test_app().await;
    let state = start(&app, "calendar", "42").await;

    let token = app
        .server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"access-1","refresh_token":"refresh-1","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let query = format!("code=auth-code&state={}", state);
    let first = callback(&app, "calendar", "42", &query).await;
    assert_eq!(first.status, StatusCode::OK);

    let replay = callback(&app, "calendar", "42", &query).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert!(replay.json()["reconnect_url"].is_string());

    token.assert_async().await;
}

/// A callback with no matching start is rejected without calling the provider.
#[tokio::test]
async fn test_callback_without_session() {
    let mut app = test_app().await;
    let token = app
        .server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let response = callback(&app, "calendar", "42", "code=auth-code&state=forged").await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    token.assert_async().await;
}

/// Another user's callback cannot complete a flow started by 42.
#[tokio::test]
async fn test_callback_bound_to_principal() {
    let app = test_app().await;
    let state = start(&app, "calendar", "42").await;

    let response = callback(&app, "calendar", "43", &format!("code=auth-code&state={}", state)).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(app.store.get("43", Integration::Calendar).unwrap().is_none());
}

/// A user declining consent gets a reconnect link.
#[tokio::test]
async fn test_consent_denied() {
    let app = test_app().await;
    let state = start(&app, "calendar", "42").await;

    let response = callback(
        &app,
        "calendar",
        "42",
        &format!("error=access_denied&state={}", state),
    )
    .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let body = response.json();
    assert!(body["error"].as_str().unwrap().contains("access_denied"));
    assert_eq!(body["reconnect_url"], "/api/integrations/calendar/oauth/start");
}

/// Drive is connected once for the whole office.
#[tokio::test]
async fn test_drive_connection_is_application_wide() {
    let mut app = test_app().await;
    let state = start(&app, "drive", "7").await;

    app.server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"drive-access","refresh_token":"drive-refresh","expires_in":3600,
                "scope":"https://www.googleapis.com/auth/drive"}"#,
        )
        .create_async()
        .await;

    let response = callback(&app, "drive", "7", &format!("code=auth-code&state={}", state)).await;
    assert_eq!(response.status, StatusCode::OK);

    assert!(app
        .store
        .get(APPLICATION_PRINCIPAL, Integration::Drive)
        .unwrap()
        .is_some());
    assert!(app.store.get("7", Integration::Drive).unwrap().is_none());

    let status = get(&app, "/api/integrations", "8").await.json();
    assert_eq!(status["integrations"][1]["connected"], true);
    assert_eq!(status["integrations"][0]["connected"], false);
}

/// DELETE removes the stored token; a second delete reports nothing removed.
#[tokio::test]
async fn test_disconnect() {
    let app = test_app().await;
    connect(&app, "42", Integration::Calendar, "access-1", &["calendar.readonly"]);

    let response = send(
        &app,
        "DELETE",
        "/api/integrations/calendar/connection",
        Some("42"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["removed"], true);
    assert!(app.store.get("42", Integration::Calendar).unwrap().is_none());

    let again = send(
        &app,
        "DELETE",
        "/api/integrations/calendar/connection",
        Some("42"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(again.json()["removed"], false);
}

/// Requests without a forwarded principal are rejected.
#[tokio::test]
async fn test_missing_principal_returns_401() {
    let app = test_app().await;

    let response = send(&app, "GET", "/api/integrations", None, None, Body::empty()).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.json()["reconnect_url"].is_null());
}

/// Unknown integration names are 404.
#[tokio::test]
async fn test_unknown_integration_returns_404() {
    let app = test_app().await;

    let response = get(&app, "/api/integrations/gmail/oauth/start", "42").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
