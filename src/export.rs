//! TSV rendering and per-spreadsheet export.

use crate::google::sheets::SheetReader;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Writes every sheet of a spreadsheet into a destination directory, one
/// `<sheet title>.tsv` per sheet. Existing files are overwritten, so
/// re-running an export refreshes the output in place.
pub struct SheetExporter<'a, R: SheetReader + ?Sized> {
    reader: &'a mut R,
}

impl<'a, R: SheetReader + ?Sized> SheetExporter<'a, R> {
    pub fn new(reader: &'a mut R) -> Self {
        Self { reader }
    }

    /// Export one spreadsheet into `dest`, returning the number of sheets
    /// written. The directory is created if it does not exist.
    pub async fn export_spreadsheet(&mut self, spreadsheet_id: &str, dest: &Path) -> Result<usize> {
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let titles = self.reader.sheet_titles(spreadsheet_id).await?;
        for title in &titles {
            let rows = self.reader.sheet_grid(spreadsheet_id, title).await?;
            let path = dest.join(format!("{}.tsv", sanitize_file_name(title)));
            fs::write(&path, render_tsv(&rows))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            debug!("wrote {} rows to {}", rows.len(), path.display());
        }
        Ok(titles.len())
    }
}

/// Render a cell grid as TSV: one line per row, cells joined with tabs,
/// every line `\n`-terminated. Cells are trimmed and embedded line breaks
/// become `|` so a cell can never split a row.
pub fn render_tsv(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in rows {
        let mut cells = row.iter();
        if let Some(cell) = cells.next() {
            out.push_str(&clean_cell(cell));
        }
        for cell in cells {
            out.push('\t');
            out.push_str(&clean_cell(cell));
        }
        out.push('\n');
    }
    out
}

fn clean_cell(cell: &str) -> String {
    cell.trim().replace('\n', "|")
}

/// Replace the characters the local filesystem cannot take in a single path
/// component. Nothing else is touched, remote names map through as-is.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if std::path::is_separator(c) || c == '\0' {
                '_'
            } else {
                c
            }
        })
        .collect()
}
