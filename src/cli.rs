//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

/// Folder the export starts from when no override is given.
pub const DEFAULT_ROOT_FOLDER_ID: &str = "1TGsJBltDttqs6nsbUwopX5BL_q8AU-5X";

/// Export every Google Sheets workbook under a Drive folder as TSV files.
///
/// The output directory mirrors the remote folder structure: one directory
/// per spreadsheet, one `<sheet>.tsv` file per sheet inside it.
#[derive(Debug, Parser)]
#[command(name = "sheetgrab", version, about)]
pub struct Cli {
    /// Directory to write the exported spreadsheets into
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Authorize by entering a code on another device instead of the
    /// local-browser redirect (for headless machines)
    #[arg(long)]
    pub console: bool,

    /// Drive folder id to start the walk from
    #[arg(long, value_name = "ID", default_value = DEFAULT_ROOT_FOLDER_ID)]
    pub folder: String,

    /// Directory holding the drive.json and sheets.json client secrets
    /// (defaults to the tool's config directory)
    #[arg(long, value_name = "DIR")]
    pub secrets_dir: Option<PathBuf>,

    /// Folder name to leave out of the walk (repeatable)
    #[arg(long = "skip", value_name = "NAME")]
    pub skip: Vec<String>,

    /// Also download each spreadsheet as a raw XLSX workbook
    #[arg(long)]
    pub raw: bool,
}
