//! Google Drive connector.
//!
//! Implements [`RemoteStore`] against the Drive v3 REST API with `reqwest`.
//! Listing follows `nextPageToken` until exhausted; documents are created
//! with a `multipart/related` upload that asks Drive to convert the plain
//! text into a native document.
//!
//! # Authentication
//!
//! A bearer access token is read from the environment variable named by
//! `remote.token_env` (default `CTXSYNC_ACCESS_TOKEN`). Obtaining and
//! refreshing that token is left to an external OAuth helper.
//!
//! # Error mapping
//!
//! | Response | [`RemoteError`] |
//! |----------|-----------------|
//! | 401, 403 (non rate-limit) | `Auth` |
//! | 403 rate limit, 408, 429, 5xx, network | `Transient` |
//! | 404 | `NotFound` |
//! | other 4xx | `Permanent` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::models::RemoteFileMeta;
use crate::remote::{RemoteError, RemoteStore, MIME_DOCUMENT, MIME_TEXT};

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,size,md5Checksum";
const PAGE_SIZE: &str = "1000";

pub struct DriveClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl DriveClient {
    /// Build a client from config. A missing token is a configuration
    /// error, reported before any request is made.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let token = match std::env::var(&config.token_env) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => bail!(
                "{} environment variable not set (remote access token required)",
                config.token_env
            ),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.api_base)
    }

    async fn list_query(&self, q: &str) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);

        loop {
            let mut params = vec![
                ("q", q.to_string()),
                ("fields", fields.clone()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let resp = self
                .client
                .get(self.files_url())
                .bearer_auth(&self.token)
                .query(&params)
                .send()
                .await
                .map_err(network_error)?;
            let page: FileList = check(resp).await?.json().await.map_err(network_error)?;

            out.extend(page.files.into_iter().map(DriveFile::into_meta));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<&str>,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        self.list_query(&folder_query(folder_id, mime_type)).await
    }

    async fn get_metadata(&self, file_id: &str) -> Result<RemoteFileMeta, RemoteError> {
        let resp = self
            .client
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(&self.token)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(network_error)?;
        let file: DriveFile = check(resp).await?.json().await.map_err(network_error)?;
        Ok(file.into_meta())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self
            .client
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(network_error)?;
        let bytes = check(resp).await?.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }

    async fn create_document(
        &self,
        folder_id: &str,
        name: &str,
        text: &str,
    ) -> Result<String, RemoteError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": MIME_DOCUMENT,
            "parents": [folder_id],
        });
        let boundary = format!("ctxsync-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata.to_string(), text);

        let resp = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(network_error)?;
        let created: CreatedFile = check(resp).await?.json().await.map_err(network_error)?;
        Ok(created.id)
    }

    async fn update_document(&self, document_id: &str, text: &str) -> Result<(), RemoteError> {
        let resp = self
            .client
            .patch(format!(
                "{}/upload/drive/v3/files/{}",
                self.api_base, document_id
            ))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=UTF-8")
            .body(text.to_string())
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        Ok(())
    }

    async fn find_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        let q = format!(
            "name = '{}' and {}",
            escape_query(name),
            folder_query(folder_id, None)
        );
        self.list_query(&q).await
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        let resp = self
            .client
            .delete(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network_error)?;
        check(resp).await?;
        Ok(())
    }
}

// ============ Wire types ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    modified_time: DateTime<Utc>,
    /// Drive encodes int64 values as strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
}

impl DriveFile {
    fn into_meta(self) -> RemoteFileMeta {
        RemoteFileMeta {
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            modified_time: self.modified_time,
            size: self.size.and_then(|s| s.parse().ok()),
            checksum: self.md5_checksum,
        }
    }
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

// ============ Helpers ============

fn folder_query(folder_id: &str, mime_type: Option<&str>) -> String {
    let mut q = format!("'{}' in parents and trashed = false", escape_query(folder_id));
    if let Some(mime) = mime_type {
        q.push_str(&format!(" and mimeType = '{}'", escape_query(mime)));
    }
    q
}

/// Escape a literal for a Drive `q` string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related(boundary: &str, metadata_json: &str, text: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n\
         --{b}\r\nContent-Type: {mime}; charset=UTF-8\r\n\r\n{text}\r\n--{b}--\r\n",
        b = boundary,
        meta = metadata_json,
        mime = MIME_TEXT,
        text = text,
    )
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let detail = format!(
        "HTTP {}: {}",
        status,
        body.chars().take(300).collect::<String>()
    );
    match status.as_u16() {
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            RemoteError::Transient(detail)
        }
        401 | 403 => RemoteError::Auth(detail),
        404 => RemoteError::NotFound(detail),
        408 | 429 => RemoteError::Transient(detail),
        s if s >= 500 => RemoteError::Transient(detail),
        _ => RemoteError::Permanent(detail),
    }
}

fn network_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Permanent(e.to_string())
    } else {
        RemoteError::Transient(e.to_string())
    }
}
