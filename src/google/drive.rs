//! Thin Google Drive v3 client.
//!
//! Only the two calls an export run needs: listing the children of a folder
//! and exporting a spreadsheet as a raw XLSX workbook.

use crate::error::check_status;
use crate::google::oauth::GoogleAuth;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Conversion target for raw workbook downloads.
const XLSX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// A file or folder as returned by the Drive `files.list` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

impl DriveEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.mime_type == SPREADSHEET_MIME_TYPE
    }
}

/// One page of `files.list` results.
#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// The one Drive capability the folder walker needs: list the direct,
/// non-trashed children of a folder.
#[async_trait]
pub trait FolderLister {
    async fn list_children(&mut self, folder_id: &str) -> Result<Vec<DriveEntry>>;
}

#[derive(Debug, Clone)]
pub struct DriveClient {
    auth: GoogleAuth,
    http: reqwest::Client,
    base_url: String,
}

impl DriveClient {
    pub fn new(auth: GoogleAuth) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, auth)
    }

    /// Create a client against a custom endpoint (used by tests).
    pub fn with_base_url(base_url: impl Into<String>, auth: GoogleAuth) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Download the spreadsheet converted to an XLSX workbook.
    pub async fn export_xlsx(&mut self, file_id: &str) -> Result<Vec<u8>> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("files/{file_id}/export")))
            .header("Authorization", format!("Bearer {token}"))
            .query(&[("mimeType", XLSX_MIME_TYPE)])
            .send()
            .await
            .context("Failed to request the workbook export")?;
        let response = check_status("drive files.export", response).await?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read the workbook export body")?;
        debug!("exported {} bytes for file {}", bytes.len(), file_id);
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FolderLister for DriveClient {
    /// Return every direct child of the folder, following pagination.
    async fn list_children(&mut self, folder_id: &str) -> Result<Vec<DriveEntry>> {
        let query = format!("'{folder_id}' in parents and trashed=false");
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.access_token().await?;
            let mut request = self
                .http
                .get(self.url("files"))
                .header("Authorization", format!("Bearer {token}"))
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken, files(id, name, mimeType)"),
                    ("pageSize", "100"),
                ]);
            if let Some(page_token) = &page_token {
                request = request.query(&[("pageToken", page_token.as_str())]);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to list the children of folder {folder_id}"))?;
            let response = check_status("drive files.list", response).await?;
            let page: FileListResponse = response
                .json()
                .await
                .context("Failed to parse the file list response")?;

            entries.extend(page.files);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("folder {} has {} children", folder_id, entries.len());
        Ok(entries)
    }
}
