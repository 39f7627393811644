//! Client-secret discovery for the two Google APIs.
//!
//! Each API gets its own OAuth client, mirroring how the Cloud Console hands
//! out one JSON file per enabled API. The files live in the tool's config
//! directory unless the run points somewhere else.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name under the platform config dir holding secrets and tokens.
const CONFIG_DIR_NAME: &str = "sheetgrab";

/// The two Google APIs used by an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoogleApi {
    Drive,
    Sheets,
}

impl GoogleApi {
    /// Short name used in file names and log lines.
    pub fn key(self) -> &'static str {
        match self {
            GoogleApi::Drive => "drive",
            GoogleApi::Sheets => "sheets",
        }
    }

    /// OAuth scope requested during consent. Both are read-only. Drive gets
    /// the content scope: `files.export` rejects metadata-only tokens.
    pub fn scope(self) -> &'static str {
        match self {
            GoogleApi::Drive => "https://www.googleapis.com/auth/drive.readonly",
            GoogleApi::Sheets => "https://www.googleapis.com/auth/spreadsheets.readonly",
        }
    }
}

/// OAuth client credentials in Google's installed-application JSON layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://accounts.google.com/o/oauth2/token".to_string()
}

/// Outer envelope of the downloaded secret file.
#[derive(Debug, Deserialize)]
struct SecretFile {
    installed: ClientSecret,
}

/// Resolve the directory holding the two client-secret files.
pub fn secrets_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => config_dir(),
    }
}

/// Base config directory for the tool.
pub(crate) fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join(CONFIG_DIR_NAME))
}

/// Load the client secret for one API from `<dir>/<api>.json`.
pub fn load_client_secret(api: GoogleApi, dir: &Path) -> Result<ClientSecret> {
    let path = dir.join(format!("{}.json", api.key()));
    let content = fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read the {} client secret at {} (download it from the Google Cloud Console)",
            api.key(),
            path.display()
        )
    })?;
    let file: SecretFile = serde_json::from_str(&content).with_context(|| {
        format!(
            "{} is not an installed-application OAuth client secret",
            path.display()
        )
    })?;
    Ok(file.installed)
}

/// Where the persisted token set for one API lives.
pub fn token_path(api: GoogleApi) -> Result<PathBuf> {
    Ok(config_dir()?
        .join("tokens")
        .join(format!("{}.json", api.key())))
}
