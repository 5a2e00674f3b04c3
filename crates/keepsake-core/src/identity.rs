//! Identity normalization.
//!
//! Callers may name an identity either as 64 hex characters or as a NIP-19
//! `npub1...` string. Everything past the input boundary works in lowercase
//! hex. Decoding fails closed: a bad checksum or wrong prefix is an error,
//! never a best-effort guess.

use nostr::nips::nip19::FromBech32;
use nostr::{PublicKey, ToBech32};

use crate::error::{Error, Result};

const NPUB_PREFIX: &str = "npub1";

/// Normalize a hex or `npub` identity to lowercase hex.
pub fn normalize_identity(input: &str) -> Result<String> {
    let input = input.trim();
    let lowered = input.to_ascii_lowercase();

    if lowered.starts_with(NPUB_PREFIX) {
        let pubkey = PublicKey::from_bech32(&lowered).map_err(|e| invalid(input, e))?;
        return Ok(pubkey.to_hex());
    }

    let bytes = hex::decode(&lowered).map_err(|e| invalid(input, e))?;
    if bytes.len() != 32 {
        return Err(invalid(
            input,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(lowered)
}

/// Encode a hex public key as `npub`.
pub fn to_npub(hex_pubkey: &str) -> Result<String> {
    let pubkey = PublicKey::from_hex(hex_pubkey).map_err(|e| invalid(hex_pubkey, e))?;
    pubkey.to_bech32().map_err(|e| invalid(hex_pubkey, e))
}

fn invalid(input: &str, reason: impl std::fmt::Display) -> Error {
    Error::InvalidIdentity {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
