//! Error types for the synchronization engine.
//!
//! Per-relay faults ([`Error::ConnectionFailure`], [`Error::Timeout`],
//! [`Error::MalformedMessage`]) are absorbed into that relay's status entry
//! and never fail a pass. Membership errors and cancellation are surfaced to
//! the caller.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum Error {
    /// Relay unreachable, handshake failed, or the socket errored.
    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    /// No traffic within the idle window, or the session deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The relay sent a frame with an unexpected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No contact list for the identity was found in the gathered records.
    #[error("no membership record found for {identity}")]
    MembershipMissing {
        /// Hex identity that was searched for.
        identity: String,
    },

    /// The newest contact list does not yield a usable relay set.
    #[error("invalid membership record: {0}")]
    InvalidMembership(String),

    /// The pass was aborted through the engine's cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Core codec or identity error.
    #[error(transparent)]
    Core(#[from] keepsake_core::Error),
}

impl Error {
    /// Short label used for the `reason` metric label and status details.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailure(_) => "connection",
            Self::Timeout => "timeout",
            Self::MalformedMessage(_) => "malformed",
            Self::Cancelled => "cancelled",
            Self::MembershipMissing { .. } | Self::InvalidMembership(_) => "membership",
            Self::Config(_) | Self::Core(_) => "other",
        }
    }

    /// Whether the caller may fall back to a known relay set.
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            Self::MembershipMissing { .. } | Self::InvalidMembership(_)
        )
    }

    /// Lift a core codec error, keeping malformed frames in the relay-local taxonomy.
    pub(crate) fn from_wire(err: keepsake_core::Error) -> Self {
        match err {
            keepsake_core::Error::MalformedMessage(msg) => Self::MalformedMessage(msg),
            other => Self::Core(other),
        }
    }
}
