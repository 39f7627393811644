//! One-shot export run: authenticate, walk the folder tree, write TSV files.

use crate::cli::Cli;
use crate::export::{sanitize_file_name, SheetExporter};
use crate::google::credentials::{load_client_secret, secrets_dir, GoogleApi};
use crate::google::drive::DriveClient;
use crate::google::oauth::{ConsentFlow, GoogleAuth};
use crate::google::sheets::SheetsClient;
use crate::walk::SpreadsheetWalk;
use anyhow::{Context, Result};
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::info;

/// Totals reported after a completed run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub spreadsheets: usize,
    pub sheets: usize,
}

pub async fn run(cli: Cli) -> Result<RunSummary> {
    let term = Term::stdout();
    let secrets = secrets_dir(cli.secrets_dir.as_deref())?;
    let flow = if cli.console {
        ConsentFlow::DeviceCode
    } else {
        ConsentFlow::Redirect
    };

    // Both APIs are authorized up front so every consent prompt happens
    // before the first byte of output is written.
    term.write_line("🔐 Authenticating with Google Drive...")?;
    let drive_secret = load_client_secret(GoogleApi::Drive, &secrets)?;
    let mut drive_auth = GoogleAuth::new(GoogleApi::Drive, drive_secret, flow)?;
    drive_auth
        .authenticate()
        .await
        .context("Google Drive authentication failed")?;
    let mut drive = DriveClient::new(drive_auth);

    term.write_line("🔐 Authenticating with Google Sheets...")?;
    let sheets_secret = load_client_secret(GoogleApi::Sheets, &secrets)?;
    let mut sheets_auth = GoogleAuth::new(GoogleApi::Sheets, sheets_secret, flow)?;
    sheets_auth
        .authenticate()
        .await
        .context("Google Sheets authentication failed")?;
    let mut sheets = SheetsClient::new(sheets_auth);

    // Separate client for the raw downloads, the walker holds the other one
    // for the whole traversal.
    let mut workbook_drive = if cli.raw { Some(drive.clone()) } else { None };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Walking folder {}", cli.folder));

    let skip: HashSet<String> = cli.skip.iter().cloned().collect();
    let mut walk = SpreadsheetWalk::new(&mut drive, &cli.folder, skip);
    let mut exporter = SheetExporter::new(&mut sheets);
    let mut summary = RunSummary::default();

    while let Some(hit) = walk.next().await? {
        let dest = cli
            .output_dir
            .join(&hit.relative_path)
            .join(sanitize_file_name(&hit.name));
        spinner.set_message(format!("Exporting '{}'", hit.name));

        let sheet_count = exporter
            .export_spreadsheet(&hit.id, &dest)
            .await
            .with_context(|| format!("Failed to export spreadsheet '{}'", hit.name))?;

        if let Some(drive) = workbook_drive.as_mut() {
            let bytes = drive
                .export_xlsx(&hit.id)
                .await
                .with_context(|| format!("Failed to download the workbook for '{}'", hit.name))?;
            let workbook_path = dest.join(format!("{}.xlsx", sanitize_file_name(&hit.name)));
            fs::write(&workbook_path, bytes)
                .with_context(|| format!("Failed to write {}", workbook_path.display()))?;
        }

        spinner.println(format!("   Saved {} sheets to {}", sheet_count, dest.display()));
        summary.spreadsheets += 1;
        summary.sheets += sheet_count;
    }

    spinner.finish_and_clear();
    term.write_line("")?;
    term.write_line("📊 Export Summary:")?;
    term.write_line(&format!("   Spreadsheets: {}", summary.spreadsheets))?;
    term.write_line(&format!("   Sheets written: {}", summary.sheets))?;
    term.write_line(&format!("   Output: {}", cli.output_dir.display()))?;
    info!(
        "export complete: {} spreadsheets, {} sheets",
        summary.spreadsheets, summary.sheets
    );
    Ok(summary)
}
