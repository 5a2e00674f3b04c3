//! Relay address handling.

pub mod url;

pub use url::{NormalizeOptions, NormalizeResult, normalize_relay_list, normalize_relay_url};
