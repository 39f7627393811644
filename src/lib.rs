//! Export Google Sheets workbooks from a Drive folder tree as TSV files.
//!
//! The crate authenticates against the Drive and Sheets APIs with per-API
//! OAuth tokens, lazily walks a Drive folder tree, and writes one tab
//! separated file per sheet into a local directory tree mirroring the
//! remote folder structure.

pub mod cli;
pub mod error;
pub mod export;
pub mod google;
pub mod run;
pub mod walk;

// Re-export the types a one-shot invocation needs
pub use cli::Cli;
pub use run::{run, RunSummary};
