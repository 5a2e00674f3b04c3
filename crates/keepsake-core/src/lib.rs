//! Core types and shared utilities for Keepsake.
//!
//! This crate provides:
//! - The [`Record`] type (a NIP-01 event, consumed verbatim) and the backup filters
//! - The relay wire codec ([`ClientMessage`] / [`RelayMessage`]) over `nostr`'s message types
//! - Identity normalization between hex and NIP-19 `npub` encodings
//! - The export document format used to hand backups to storage
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod export;
pub mod identity;
pub mod metrics;
pub mod protocol;
mod record;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of the contact-list record that also carries the author's relay set.
pub const MEMBERSHIP_KIND: u64 = 3;

pub use error::{Error, Result};
pub use export::{EXPORT_FILE_NAME, EXPORT_HEADER, parse_export_document, to_export_document};
pub use identity::{normalize_identity, to_npub};
pub use protocol::{ClientMessage, RelayMessage};
pub use nostr::{Event, Filter};
pub use record::{Record, backup_filters, sort_newest_first};
