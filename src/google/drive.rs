//! Google Drive v3 files.
//!
//! When a shared drive is enabled every call carries `supportsAllDrives`, and
//! listings are scoped to that drive with `corpora=drive`.

use super::{read_json, ApiError, ApiOperation, GoogleApi};
use crate::credentials::TokenRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,parents,modifiedTime,size,webViewLink,webContentLink";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    /// Decimal byte count; absent for folders and native documents
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUser {
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Identity of the connected Drive account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveAbout {
    pub user: DriveUser,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Escape a value for use inside a single-quoted Drive query string
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Drive calls made with one token
pub struct DriveClient<'a> {
    api: &'a GoogleApi,
    token: &'a TokenRecord,
}

impl<'a> DriveClient<'a> {
    pub(super) fn new(api: &'a GoogleApi, token: &'a TokenRecord) -> Self {
        Self { api, token }
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api.endpoints().drive)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.files_url(), urlencoding::encode(file_id))
    }

    /// Parameters every call needs in shared-drive mode
    fn drive_params(&self) -> Vec<(&'static str, String)> {
        match self.api.shared_drive() {
            Some(_) => vec![("supportsAllDrives", "true".to_string())],
            None => Vec::new(),
        }
    }

    /// Parameters for `files.list` calls
    fn list_params(&self, query: String, page_size: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query),
            ("pageSize", page_size.to_string()),
            ("orderBy", "folder,name".to_string()),
            ("fields", format!("files({})", FILE_FIELDS)),
        ];
        if let Some(drive_id) = self.api.shared_drive() {
            params.push(("corpora", "drive".to_string()));
            params.push(("driveId", drive_id.to_string()));
            params.push(("includeItemsFromAllDrives", "true".to_string()));
            params.push(("supportsAllDrives", "true".to_string()));
        }
        params
    }

    async fn list(&self, query: String, page_size: u32) -> Result<Vec<DriveFile>, ApiError> {
        let url = self.files_url();
        let params = self.list_params(query, page_size);
        let response = self
            .api
            .execute(ApiOperation::ListFiles, self.token, |http| http.get(&url).query(&params))
            .await?;
        let list: FileList = read_json(ApiOperation::ListFiles, response).await?;
        Ok(list.files)
    }

    /// Non-trashed children of a folder
    pub async fn list_files(&self, parent_id: &str, page_size: u32) -> Result<Vec<DriveFile>, ApiError> {
        self.list(
            format!("'{}' in parents and trashed=false", quote(parent_id)),
            page_size,
        )
        .await
    }

    /// Children of the configured root folder, or of "My Drive"
    pub async fn list_root(&self, max_items: u32) -> Result<Vec<DriveFile>, ApiError> {
        let root = self.api.drive_root().unwrap_or("root").to_string();
        self.list_files(&root, max_items).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile, ApiError> {
        let url = self.file_url(file_id);
        let mut params = self.drive_params();
        params.push(("fields", FILE_FIELDS.to_string()));
        let response = self
            .api
            .execute(ApiOperation::GetFile, self.token, |http| http.get(&url).query(&params))
            .await?;
        read_json(ApiOperation::GetFile, response).await
    }

    /// Find a folder by name under `parent`, creating it if absent
    ///
    /// Without `parent` the configured root folder is used.
    pub async fn ensure_folder(&self, name: &str, parent: Option<&str>) -> Result<DriveFile, ApiError> {
        let parent = parent.or(self.api.drive_root());

        let mut query = format!(
            "mimeType='{}' and name='{}' and trashed=false",
            FOLDER_MIME_TYPE,
            quote(name)
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", quote(parent)));
        }
        if let Some(existing) = self.list(query, 1).await?.into_iter().next() {
            return Ok(existing);
        }

        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let url = self.files_url();
        let mut params = self.drive_params();
        params.push(("fields", FILE_FIELDS.to_string()));
        let response = self
            .api
            .execute(ApiOperation::CreateFolder, self.token, |http| {
                http.post(&url).query(&params).json(&metadata)
            })
            .await?;
        read_json(ApiOperation::CreateFolder, response).await
    }

    /// Upload a file with metadata in one multipart request
    ///
    /// Without `parent` the configured root folder is used.
    pub async fn upload_file(
        &self,
        name: &str,
        parent: Option<&str>,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<DriveFile, ApiError> {
        let parent = parent.or(self.api.drive_root());
        let mut metadata = json!({ "name": name, "mimeType": mime_type });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let boundary = format!("docket-{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &content);
        let content_type = format!("multipart/related; boundary={}", boundary);

        let url = format!("{}/files", self.api.endpoints().drive_upload);
        let mut params = self.drive_params();
        params.push(("uploadType", "multipart".to_string()));
        params.push(("fields", FILE_FIELDS.to_string()));

        let response = self
            .api
            .execute(ApiOperation::UploadFile, self.token, |http| {
                http.post(&url)
                    .query(&params)
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;
        read_json(ApiOperation::UploadFile, response).await
    }

    /// Raw content of a binary file
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.file_url(file_id);
        let mut params = self.drive_params();
        params.push(("alt", "media".to_string()));
        let response = self
            .api
            .execute(ApiOperation::DownloadFile, self.token, |http| http.get(&url).query(&params))
            .await?;
        let bytes = response.bytes().await.map_err(|e| ApiError::from_transport(&e))?;
        Ok(bytes.to_vec())
    }

    pub async fn about(&self) -> Result<DriveAbout, ApiError> {
        let url = format!("{}/about", self.api.endpoints().drive);
        let response = self
            .api
            .execute(ApiOperation::About, self.token, |http| {
                http.get(&url).query(&[("fields", "user(emailAddress,displayName)")])
            })
            .await?;
        read_json(ApiOperation::About, response).await
    }
}

/// `multipart/related` body: JSON metadata part, then the media part
fn multipart_related(boundary: &str, metadata: &serde_json::Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::tests::token;
    use crate::google::GoogleEndpoints;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn api(server: &Server) -> GoogleApi {
        GoogleApi::new(
            GoogleEndpoints {
                calendar: server.url(),
                drive: server.url(),
                drive_upload: format!("{}/upload", server.url()),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("Pérez O'Brien"), "Pérez O\\'Brien");
        assert_eq!(quote(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_multipart_layout() {
        let metadata = json!({"name": "escrito.pdf"});
        let body = multipart_related("b1", &metadata, "application/pdf", b"%PDF-1.7");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--b1\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"escrito.pdf\"}\r\n--b1\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.7\r\n--b1--\r\n"
        );
    }

    #[tokio::test]
    async fn test_list_files() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "'folder-1' in parents and trashed=false".into()),
                Matcher::UrlEncoded("pageSize".into(), "50".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"files": [
                    {"id": "f1", "name": "Expedientes", "mimeType": "application/vnd.google-apps.folder"},
                    {"id": "f2", "name": "demanda.pdf", "mimeType": "application/pdf", "size": "48213", "parents": ["folder-1"]}
                ]}"#,
            )
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let files = api.drive(&token).list_files("folder-1", 50).await.unwrap();

        mock.assert_async().await;
        assert_eq!(files.len(), 2);
        assert!(files[0].is_folder());
        assert_eq!(files[1].size.as_deref(), Some("48213"));
        assert_eq!(files[1].parents, vec!["folder-1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_root_defaults_to_my_drive() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "'root' in parents and trashed=false".into(),
            ))
            .with_status(200)
            .with_body(r#"{"files": []}"#)
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        assert!(api.drive(&token).list_root(20).await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_shared_drive_params() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "'0AShared' in parents and trashed=false".into()),
                Matcher::UrlEncoded("corpora".into(), "drive".into()),
                Matcher::UrlEncoded("driveId".into(), "0AShared".into()),
                Matcher::UrlEncoded("includeItemsFromAllDrives".into(), "true".into()),
                Matcher::UrlEncoded("supportsAllDrives".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"files": []}"#)
            .create_async()
            .await;

        let api = api(&server).with_drive_root(Some("0AShared".to_string()), true);
        let token = token();
        api.drive(&token).list_root(20).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_folder_finds_existing() {
        let mut server = Server::new_async().await;
        let search = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "mimeType='application/vnd.google-apps.folder' and name='Cliente O\\'Neil' and trashed=false and 'parent-1' in parents".into(),
            ))
            .with_status(200)
            .with_body(r#"{"files": [{"id": "existing", "name": "Cliente O'Neil", "mimeType": "application/vnd.google-apps.folder"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let folder = api
            .drive(&token)
            .ensure_folder("Cliente O'Neil", Some("parent-1"))
            .await
            .unwrap();

        assert_eq!(folder.id, "existing");
        search.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_folder_creates_under_root() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"files": []}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "name": "Expediente 118-2026",
                "mimeType": FOLDER_MIME_TYPE,
                "parents": ["root-folder"]
            })))
            .with_status(200)
            .with_body(r#"{"id": "new-folder", "name": "Expediente 118-2026", "mimeType": "application/vnd.google-apps.folder"}"#)
            .create_async()
            .await;

        let api = api(&server).with_drive_root(Some("root-folder".to_string()), false);
        let token = token();
        let folder = api
            .drive(&token)
            .ensure_folder("Expediente 118-2026", None)
            .await
            .unwrap();

        create.assert_async().await;
        assert_eq!(folder.id, "new-folder");
    }

    #[tokio::test]
    async fn test_upload_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/upload/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "multipart".into()))
            .match_header("content-type", Matcher::Regex("^multipart/related; boundary=docket-".into()))
            .match_body(Matcher::Regex("(?s)\"name\":\"escrito.pdf\".*%PDF-1.7".into()))
            .with_status(200)
            .with_body(r#"{"id": "uploaded", "name": "escrito.pdf", "mimeType": "application/pdf"}"#)
            .expect(1)
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let file = api
            .drive(&token)
            .upload_file("escrito.pdf", Some("folder-1"), "application/pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(file.id, "uploaded");
    }

    #[tokio::test]
    async fn test_download_file() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/f2")
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(b"%PDF-1.7 content")
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let bytes = api.drive(&token).download_file("f2").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7 content".to_vec());
    }

    #[tokio::test]
    async fn test_about() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/about")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"user": {"emailAddress": "despacho@example.com", "displayName": "Despacho"}}"#)
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let about = api.drive(&token).about().await.unwrap();
        assert_eq!(about.user.email_address.as_deref(), Some("despacho@example.com"));
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_rate_limited() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/f1")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("retry-after", "30")
            .with_body(r#"{"error":{"code":403,"message":"User Rate Limit Exceeded","errors":[{"reason":"userRateLimitExceeded"}]}}"#)
            .create_async()
            .await;

        let api = api(&server);
        let token = token();
        let err = api.drive(&token).get_file("f1").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after_secs: Some(30),
                message: "User Rate Limit Exceeded".to_string(),
            }
        );
    }
}
