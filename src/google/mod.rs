//! Clients for the two Google APIs the exporter talks to.
//!
//! Credential discovery and OAuth token handling sit next to thin REST
//! clients for Drive (folder listing, workbook export) and Sheets (sheet
//! metadata and cell values).

pub mod credentials;
pub mod drive;
pub mod oauth;
pub mod sheets;
