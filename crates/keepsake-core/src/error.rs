//! Error types for Keepsake core types and codecs.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding records, messages and identities.
#[derive(Error, Debug)]
pub enum Error {
    /// The identity is neither 64 hex characters nor a valid `npub`.
    #[error("invalid identity '{input}': {reason}")]
    InvalidIdentity {
        /// The rejected input, trimmed.
        input: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// A relay frame did not have the expected shape.
    #[error("malformed relay message: {0}")]
    MalformedMessage(String),

    /// A record cannot be expressed as a NIP-01 event.
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// The record's id as given.
        id: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// A frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// The export document is missing its header or body.
    #[error("invalid export document: {0}")]
    InvalidExport(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
