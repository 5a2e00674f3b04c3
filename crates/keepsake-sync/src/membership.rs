//! Relay set resolution from the identity's contact list.
//!
//! The newest `kind == 3` record authored by the identity carries, in its
//! content, a JSON object mapping relay addresses to read/write flags:
//!
//! ```json
//! {"wss://relay.example.com": {"read": true, "write": true}}
//! ```
//!
//! The relay set is every address flagged `write`, normalized and
//! deduplicated. Older contact lists are ignored entirely.

use crate::error::{Error, Result};
use crate::relay::{NormalizeOptions, NormalizeResult, normalize_relay_url};
use keepsake_core::Record;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Normalized relay addresses, ordered and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySet(BTreeSet<String>);

impl RelaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.contains(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Addresses as an ordered list, the shape passes take.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for RelaySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for RelaySet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RelaySet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Derives the relay set an identity publishes to.
#[derive(Debug, Clone, Default)]
pub struct MembershipResolver {
    opts: NormalizeOptions,
}

impl MembershipResolver {
    pub fn new(opts: NormalizeOptions) -> Self {
        Self { opts }
    }

    /// The identity's newest contact list, if any.
    ///
    /// Equal timestamps resolve to the record with the smallest id.
    pub fn latest<'r>(&self, records: &'r [Record], identity: &str) -> Option<&'r Record> {
        newest(records.iter().filter(|r| r.is_membership_for(identity)))
    }

    /// Write-capable relays from the identity's newest contact list.
    pub fn resolve(&self, records: &[Record], identity: &str) -> Result<RelaySet> {
        let latest = self
            .latest(records, identity)
            .ok_or_else(|| Error::MembershipMissing {
                identity: identity.to_string(),
            })?;

        tracing::debug!(
            "Using contact list {} (created_at {})",
            latest.id,
            latest.created_at
        );

        let entries = parse_relay_map(&latest.content)?;

        let mut set = BTreeSet::new();
        for (address, flags) in &entries {
            if !is_write(flags) {
                continue;
            }
            match normalize_relay_url(address, &self.opts) {
                NormalizeResult::Ok(url) => {
                    set.insert(url);
                }
                NormalizeResult::Invalid(reason) | NormalizeResult::Blocked(reason) => {
                    tracing::debug!("Skipping write relay {}: {}", address, reason);
                }
            }
        }

        if set.is_empty() {
            return Err(Error::InvalidMembership(format!(
                "contact list {} lists no usable write relays",
                latest.id
            )));
        }

        tracing::info!("Resolved {} write relays", set.len());
        Ok(RelaySet(set))
    }
}

/// Author of the newest contact list in `records`, lowercased.
///
/// Used when an export is rebroadcast without naming its identity.
pub fn infer_identity(records: &[Record]) -> Option<String> {
    newest(records.iter().filter(|r| r.is_membership())).map(|r| r.pubkey.to_ascii_lowercase())
}

fn newest<'r>(records: impl Iterator<Item = &'r Record>) -> Option<&'r Record> {
    records.max_by(|a, b| match a.created_at.cmp(&b.created_at) {
        // Smaller id ranks higher on a tie.
        Ordering::Equal => b.id.cmp(&a.id),
        other => other,
    })
}

fn parse_relay_map(content: &str) -> Result<Map<String, Value>> {
    if content.trim().is_empty() {
        return Err(Error::InvalidMembership(
            "contact list carries no relay map".to_string(),
        ));
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::InvalidMembership(
            "relay map is not a JSON object".to_string(),
        )),
        Err(e) => Err(Error::InvalidMembership(format!(
            "relay map is not valid JSON: {e}"
        ))),
    }
}

fn is_write(flags: &Value) -> bool {
    flags
        .get("write")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2";
    const OTHER: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    fn contacts(id: &str, pubkey: &str, created_at: u64, content: &str) -> Record {
        Record {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind: 3,
            tags: vec![],
            content: content.to_string(),
            sig: "00".repeat(64),
        }
    }

    fn relay_map(urls: &[&str]) -> String {
        let map: Map<String, Value> = urls
            .iter()
            .map(|u| (u.to_string(), serde_json::json!({"read": true, "write": true})))
            .collect();
        Value::Object(map).to_string()
    }

    #[test]
    fn test_newest_contact_list_wins() {
        let records = vec![
            contacts("aa", ME, 100, &relay_map(&["wss://a.example.com"])),
            contacts("bb", ME, 200, &relay_map(&["wss://b.example.com"])),
        ];

        let set = MembershipResolver::default().resolve(&records, ME).unwrap();
        assert_eq!(set.to_vec(), vec!["wss://b.example.com"]);
    }

    #[test]
    fn test_tie_resolves_to_smallest_id() {
        let records = vec![
            contacts("bb", ME, 100, &relay_map(&["wss://b.example.com"])),
            contacts("aa", ME, 100, &relay_map(&["wss://a.example.com"])),
        ];

        let resolver = MembershipResolver::default();
        assert_eq!(resolver.latest(&records, ME).unwrap().id, "aa");
        assert_eq!(
            resolver.resolve(&records, ME).unwrap().to_vec(),
            vec!["wss://a.example.com"]
        );
    }

    #[test]
    fn test_only_write_relays_are_kept() {
        let content = r#"{
            "wss://rw.example.com": {"read": true, "write": true},
            "wss://ro.example.com": {"read": true, "write": false},
            "wss://bare.example.com": {},
            "wss://odd.example.com": "yes"
        }"#;
        let records = vec![contacts("aa", ME, 1, content)];

        let set = MembershipResolver::default().resolve(&records, ME).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("wss://rw.example.com"));
    }

    #[test]
    fn test_addresses_are_normalized_and_deduped() {
        let content = relay_map(&[
            "wss://Relay.Example.com/",
            "wss://relay.example.com",
            "ws://localhost:7777",
        ]);
        let records = vec![contacts("aa", ME, 1, &content)];

        let set = MembershipResolver::default().resolve(&records, ME).unwrap();
        assert_eq!(set.to_vec(), vec!["wss://relay.example.com"]);

        let lenient = MembershipResolver::new(NormalizeOptions {
            allow_private: true,
            ..Default::default()
        });
        assert_eq!(lenient.resolve(&records, ME).unwrap().len(), 2);
    }

    #[test]
    fn test_other_identities_are_ignored() {
        let records = vec![contacts("aa", OTHER, 500, &relay_map(&["wss://x.example.com"]))];

        let err = MembershipResolver::default().resolve(&records, ME).unwrap_err();
        assert!(matches!(err, Error::MembershipMissing { ref identity } if identity == ME));
    }

    #[test]
    fn test_unusable_content_is_invalid() {
        let resolver = MembershipResolver::default();
        for content in ["", "not json", "[1,2]", r#"{"wss://a.example.com":{"write":false}}"#] {
            let records = vec![contacts("aa", ME, 1, content)];
            let err = resolver.resolve(&records, ME).unwrap_err();
            assert!(
                matches!(err, Error::InvalidMembership(_)),
                "{content:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_newest_invalid_list_is_not_skipped() {
        let records = vec![
            contacts("aa", ME, 100, &relay_map(&["wss://a.example.com"])),
            contacts("bb", ME, 200, ""),
        ];
        let err = MembershipResolver::default().resolve(&records, ME).unwrap_err();
        assert!(matches!(err, Error::InvalidMembership(_)));
    }

    #[test]
    fn test_infer_identity_uses_newest_contact_list() {
        let records = vec![
            contacts("aa", OTHER, 100, "{}"),
            contacts("bb", &ME.to_uppercase(), 200, "{}"),
        ];
        assert_eq!(infer_identity(&records).as_deref(), Some(ME));
        assert_eq!(infer_identity(&[]), None);
    }
}
