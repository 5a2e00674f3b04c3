//! Records and query filters.
//!
//! A [`Record`] is a NIP-01 event carried verbatim: Keepsake never re-signs or
//! re-serializes the payload semantics, it only needs `id` for deduplication,
//! `pubkey`/`kind` for membership filtering and `created_at` for ordering.

use nostr::{Event, Filter, JsonUtil, PublicKey};
use serde::{Deserialize, Serialize};

use crate::MEMBERSHIP_KIND;
use crate::error::{Error, Result};

/// A signed Nostr event, field order matching NIP-01.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 32-byte content hash, hex encoded.
    pub id: String,
    /// Author public key, hex encoded.
    pub pubkey: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Payload classification.
    pub kind: u64,
    /// Ordered list of string arrays.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Opaque payload; format depends on `kind`.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature, hex encoded.
    pub sig: String,
}

impl Record {
    /// Whether this is a contact-list record of any author.
    pub fn is_membership(&self) -> bool {
        self.kind == MEMBERSHIP_KIND
    }

    /// Whether this is the contact-list record published by `identity`.
    pub fn is_membership_for(&self, identity: &str) -> bool {
        self.is_membership() && self.pubkey.eq_ignore_ascii_case(identity)
    }

    /// Convert into a wire event for publishing.
    ///
    /// Fails if a field is not in NIP-01 shape (ids and keys must be hex of
    /// the right length, kinds must fit in 16 bits).
    pub fn to_event(&self) -> Result<Event> {
        let json = serde_json::to_vec(self)?;
        Event::from_json(json).map_err(|e| Error::InvalidRecord {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

impl From<Event> for Record {
    fn from(event: Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at: event.created_at.as_u64(),
            kind: u64::from(event.kind.as_u16()),
            tags: event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect(),
            content: event.content,
            sig: event.sig.to_string(),
        }
    }
}

/// Sort records newest first; equal timestamps fall back to ascending id so
/// the order is stable across runs.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The two filters a backup of `identity` issues: records it authored and
/// records whose `p` tags mention it.
pub fn backup_filters(identity: &str) -> Result<Vec<Filter>> {
    let pubkey = PublicKey::from_hex(identity).map_err(|e| Error::InvalidIdentity {
        input: identity.to_string(),
        reason: e.to_string(),
    })?;
    Ok(vec![Filter::new().author(pubkey), Filter::new().pubkey(pubkey)])
}
