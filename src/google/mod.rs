//! Google Calendar and Drive API facade.
//!
//! Every call goes through [`GoogleApi::execute`], which attaches the bearer
//! token, classifies failures into [`ApiError`] and retries idempotent reads
//! once on a transient failure. Writes are never retried.

pub mod calendar;
pub mod drive;
mod error;

pub use calendar::{
    Attendee, CalendarClient, CalendarEvent, EventDraft, EventPatch, EventTime, ReminderOverride,
    Reminders,
};
pub use drive::{DriveAbout, DriveClient, DriveFile, DriveUser, FOLDER_MIME_TYPE};
pub use error::{classify, ApiError};

use crate::config::DocketConfig;
use crate::credentials::{Integration, TokenRecord};
use crate::scope::{google_scope, ScopeSet};
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause before the single retry of an idempotent read
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// A provider call, with the integration and permission it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    ListEvents,
    GetEvent,
    InsertEvent,
    PatchEvent,
    DeleteEvent,
    ListFiles,
    GetFile,
    CreateFolder,
    UploadFile,
    DownloadFile,
    About,
}

impl ApiOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ApiOperation::ListEvents => "calendar.events.list",
            ApiOperation::GetEvent => "calendar.events.get",
            ApiOperation::InsertEvent => "calendar.events.insert",
            ApiOperation::PatchEvent => "calendar.events.patch",
            ApiOperation::DeleteEvent => "calendar.events.delete",
            ApiOperation::ListFiles => "drive.files.list",
            ApiOperation::GetFile => "drive.files.get",
            ApiOperation::CreateFolder => "drive.files.create",
            ApiOperation::UploadFile => "drive.files.upload",
            ApiOperation::DownloadFile => "drive.files.download",
            ApiOperation::About => "drive.about.get",
        }
    }

    pub fn integration(&self) -> Integration {
        match self {
            ApiOperation::ListEvents
            | ApiOperation::GetEvent
            | ApiOperation::InsertEvent
            | ApiOperation::PatchEvent
            | ApiOperation::DeleteEvent => Integration::Calendar,
            ApiOperation::ListFiles
            | ApiOperation::GetFile
            | ApiOperation::CreateFolder
            | ApiOperation::UploadFile
            | ApiOperation::DownloadFile
            | ApiOperation::About => Integration::Drive,
        }
    }

    /// Safe to repeat: list, get, download and about
    pub fn is_idempotent_read(&self) -> bool {
        matches!(
            self,
            ApiOperation::ListEvents
                | ApiOperation::GetEvent
                | ApiOperation::ListFiles
                | ApiOperation::GetFile
                | ApiOperation::DownloadFile
                | ApiOperation::About
        )
    }

    /// Narrowest scope that authorizes the call
    pub fn required_scope(&self) -> String {
        let short = match (self.integration(), self.is_idempotent_read()) {
            (Integration::Calendar, true) => "calendar.events.readonly",
            (Integration::Calendar, false) => "calendar.events",
            (Integration::Drive, true) => "drive.readonly",
            (Integration::Drive, false) => "drive.file",
        };
        google_scope(short)
    }

    pub fn required_scopes(&self) -> ScopeSet {
        [self.required_scope()].into_iter().collect()
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Provider API base URLs
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleEndpoints {
    pub calendar: String,
    pub drive: String,
    pub drive_upload: String,
}

/// Shared HTTP client for provider resource APIs
#[derive(Clone)]
pub struct GoogleApi {
    http: Client,
    endpoints: GoogleEndpoints,
    /// Folder (or shared drive) new Drive items land in when no parent is given
    drive_root: Option<String>,
    /// Shared drive id, set only when shared-drive mode is enabled
    shared_drive: Option<String>,
}

impl GoogleApi {
    pub fn new(endpoints: GoogleEndpoints, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("docket/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build provider API HTTP client")?;
        Ok(Self {
            http,
            endpoints: GoogleEndpoints {
                calendar: endpoints.calendar.trim_end_matches('/').to_string(),
                drive: endpoints.drive.trim_end_matches('/').to_string(),
                drive_upload: endpoints.drive_upload.trim_end_matches('/').to_string(),
            },
            drive_root: None,
            shared_drive: None,
        })
    }

    pub fn from_config(config: &DocketConfig) -> Result<Self> {
        let api = Self::new(
            GoogleEndpoints {
                calendar: config.calendar.api_base_url.clone(),
                drive: config.drive.api_base_url.clone(),
                drive_upload: config.drive.upload_base_url.clone(),
            },
            Duration::from_secs(config.oauth.http_timeout_seconds),
        )?;
        Ok(api.with_drive_root(config.drive.shared_drive_id.clone(), config.drive.is_shared_drive))
    }

    /// Default parent for new Drive items; `shared` turns on shared-drive parameters
    pub fn with_drive_root(mut self, root: Option<String>, shared: bool) -> Self {
        let root = root.filter(|r| !r.trim().is_empty());
        self.shared_drive = if shared { root.clone() } else { None };
        self.drive_root = root;
        self
    }

    pub fn endpoints(&self) -> &GoogleEndpoints {
        &self.endpoints
    }

    pub fn calendar<'a>(&'a self, token: &'a TokenRecord) -> CalendarClient<'a> {
        CalendarClient::new(self, token)
    }

    pub fn drive<'a>(&'a self, token: &'a TokenRecord) -> DriveClient<'a> {
        DriveClient::new(self, token)
    }

    /// Send one provider call with `token`
    ///
    /// `build` is invoked once per attempt. Non-success responses are turned into
    /// [`ApiError`]s; idempotent reads get one more attempt after a `Transient` failure.
    pub async fn execute<F>(
        &self,
        operation: ApiOperation,
        token: &TokenRecord,
        build: F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = if operation.is_idempotent_read() { 2 } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match build(&self.http)
                .bearer_auth(&token.access_token)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(operation = %operation, status = %response.status(), "Provider call succeeded");
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    let body = response.text().await.unwrap_or_default();
                    classify(status, &headers, &body)
                }
                Err(e) => ApiError::from_transport(&e),
            };

            if error.is_transient() && attempt < attempts {
                warn!(operation = %operation, attempt, error = %error, "Transient provider failure, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }

            warn!(
                operation = %operation,
                principal = %token.principal_id,
                error = %error,
                "Provider call failed"
            );
            return Err(error);
        }
    }

    pub(crate) fn shared_drive(&self) -> Option<&str> {
        self.shared_drive.as_deref()
    }

    pub(crate) fn drive_root(&self) -> Option<&str> {
        self.drive_root.as_deref()
    }
}

/// Decode a JSON success body
pub(crate) async fn read_json<T: DeserializeOwned>(
    operation: ApiOperation,
    response: Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| ApiError::from_transport(&e))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Other {
        status: Some(status.as_u16()),
        message: format!("unexpected {} response: {}", operation, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    pub(crate) fn token() -> TokenRecord {
        TokenRecord {
            principal_id: "42".to_string(),
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expiry: Some(Utc::now() + ChronoDuration::hours(1)),
            granted_scopes: ScopeSet::new(),
        }
    }

    fn api(server: &mockito::Server) -> GoogleApi {
        GoogleApi::new(
            GoogleEndpoints {
                calendar: server.url(),
                drive: server.url(),
                drive_upload: server.url(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_operation_scopes() {
        assert_eq!(
            ApiOperation::ListEvents.required_scope(),
            "https://www.googleapis.com/auth/calendar.events.readonly"
        );
        assert_eq!(
            ApiOperation::InsertEvent.required_scope(),
            "https://www.googleapis.com/auth/calendar.events"
        );
        assert_eq!(
            ApiOperation::DownloadFile.required_scope(),
            "https://www.googleapis.com/auth/drive.readonly"
        );
        assert_eq!(
            ApiOperation::UploadFile.required_scope(),
            "https://www.googleapis.com/auth/drive.file"
        );
        assert_eq!(ApiOperation::About.integration(), Integration::Drive);
        assert!(!ApiOperation::DeleteEvent.is_idempotent_read());
        assert!(!ApiOperation::CreateFolder.is_idempotent_read());
    }

    #[test]
    fn test_drive_root_modes() {
        let endpoints = GoogleEndpoints {
            calendar: "http://c".to_string(),
            drive: "http://d/".to_string(),
            drive_upload: "http://u".to_string(),
        };
        let api = GoogleApi::new(endpoints.clone(), Duration::from_secs(1)).unwrap();
        assert_eq!(api.endpoints().drive, "http://d");

        let folder = api.clone().with_drive_root(Some("folder-1".to_string()), false);
        assert_eq!(folder.drive_root(), Some("folder-1"));
        assert_eq!(folder.shared_drive(), None);

        let shared = api.clone().with_drive_root(Some("drive-1".to_string()), true);
        assert_eq!(shared.shared_drive(), Some("drive-1"));

        let blank = api.with_drive_root(Some("  ".to_string()), true);
        assert_eq!(blank.drive_root(), None);
        assert_eq!(blank.shared_drive(), None);
    }

    #[tokio::test]
    async fn test_execute_sends_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/about")
            .match_header("authorization", "Bearer access-token")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let api = api(&server);
        let url = format!("{}/about", server.url());
        let response = api
            .execute(ApiOperation::About, &token(), |http| http.get(&url))
            .await
            .unwrap();

        assert!(response.status().is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_read_retried_once_on_transient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .with_status(503)
            .with_body("backend error")
            .expect(2)
            .create_async()
            .await;

        let api = api(&server);
        let url = format!("{}/files", server.url());
        let err = api
            .execute(ApiOperation::ListFiles, &token(), |http| http.get(&url))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_never_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/files")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let api = api(&server);
        let url = format!("{}/files", server.url());
        let err = api
            .execute(ApiOperation::CreateFolder, &token(), |http| http.post(&url))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthenticated_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .with_status(401)
            .with_body(r#"{"error":{"code":401,"message":"Invalid Credentials","errors":[{"reason":"authError"}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let api = api(&server);
        let url = format!("{}/files", server.url());
        let err = api
            .execute(ApiOperation::ListFiles, &token(), |http| http.get(&url))
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::Unauthenticated("Invalid Credentials".to_string()));
        mock.assert_async().await;
    }
}
