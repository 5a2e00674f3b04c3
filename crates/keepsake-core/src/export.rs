//! Export document format.
//!
//! A finished backup is handed to storage as a small script-style document:
//! an assignment header followed by the newest-first record array as
//! pretty-printed JSON. Re-ingestion strips the header and parses the rest.
//!
//! ```text
//! const data = [
//!   {
//!     "id": "…",
//!     …
//!   }
//! ]
//! ```

use crate::error::{Error, Result};
use crate::record::Record;

/// Prefix of every export document.
pub const EXPORT_HEADER: &str = "const data = ";

/// Default file name for an export.
pub const EXPORT_FILE_NAME: &str = "nostr-backup.js";

/// Render records as an export document.
pub fn to_export_document(records: &[Record]) -> Result<String> {
    let body = serde_json::to_string_pretty(records)?;
    Ok(format!("{EXPORT_HEADER}{body}"))
}

/// Parse an export document back into records.
pub fn parse_export_document(document: &str) -> Result<Vec<Record>> {
    let body = document
        .trim_start_matches('\u{feff}')
        .trim_start()
        .strip_prefix(EXPORT_HEADER.trim_end())
        .ok_or_else(|| Error::InvalidExport(format!("missing '{}' header", EXPORT_HEADER.trim())))?;

    let body = body.trim();
    let body = body.strip_suffix(';').unwrap_or(body);
    if body.is_empty() {
        return Err(Error::InvalidExport("empty body".to_string()));
    }

    Ok(serde_json::from_str(body)?)
}
