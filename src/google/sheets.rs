//! Thin Google Sheets v4 client.

use crate::error::check_status;
use crate::google::oauth::GoogleAuth;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Response to a metadata fetch restricted to `sheets(properties(title))`.
#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

/// Response to a `values.get` call. `values` is absent for empty sheets.
#[derive(Debug, Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// The Sheets capabilities the exporter needs: enumerate a spreadsheet's
/// sheet titles and fetch one sheet's full cell grid.
#[async_trait]
pub trait SheetReader {
    async fn sheet_titles(&mut self, spreadsheet_id: &str) -> Result<Vec<String>>;
    async fn sheet_grid(&mut self, spreadsheet_id: &str, title: &str) -> Result<Vec<Vec<String>>>;
}

#[derive(Debug, Clone)]
pub struct SheetsClient {
    auth: GoogleAuth,
    http: reqwest::Client,
    base_url: String,
}

impl SheetsClient {
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
}

#[async_trait]
impl SheetReader for SheetsClient {
    async fn sheet_titles(&mut self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("spreadsheets/{spreadsheet_id}")))
            .header("Authorization", format!("Bearer {token}"))
            .query(&[("fields", "sheets(properties(title))")])
            .send()
            .await
            .with_context(|| format!("Failed to fetch metadata for spreadsheet {spreadsheet_id}"))?;
        let response = check_status("sheets spreadsheets.get", response).await?;
        let spreadsheet: SpreadsheetResponse = response
            .json()
            .await
            .context("Failed to parse the spreadsheet metadata response")?;

        let titles: Vec<String> = spreadsheet
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect();
        debug!("spreadsheet {} has {} sheets", spreadsheet_id, titles.len());
        Ok(titles)
    }

    /// Fetch the whole sheet as formatted strings, rows in reading order.
    async fn sheet_grid(&mut self, spreadsheet_id: &str, title: &str) -> Result<Vec<Vec<String>>> {
        let token = self.auth.access_token().await?;
        let range = quote_sheet_title(title);
        let response = self
            .http
            .get(self.url(&format!(
                "spreadsheets/{spreadsheet_id}/values/{}",
                urlencoding::encode(&range)
            )))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .with_context(|| format!("Failed to fetch the values of sheet '{title}'"))?;
        let response = check_status("sheets spreadsheets.values.get", response).await?;
        let value_range: ValueRangeResponse = response
            .json()
            .await
            .context("Failed to parse the sheet values response")?;

        Ok(value_range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

/// Quote a sheet title for use as an A1 range covering the whole sheet.
/// Single quotes inside the title are doubled per the A1 grammar.
fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Formatted values are strings, but the JSON type is open. Render anything
/// else the way it appears on the wire.
fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
