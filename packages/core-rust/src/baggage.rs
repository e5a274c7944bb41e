//! Baggage: key/value metadata propagated alongside identity.
//!
//! Two inbound encodings are merged:
//! - the W3C `baggage` header, `key=value[;property]*` entries separated by commas
//! - individually prefixed `X-Baggage-<key>` headers, one per entry
//!
//! The comma-separated header is applied first, so prefixed entries override
//! same-named keys from it.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::headers::strip_baggage_prefix;

/// Lowercase key fragments that mark an entry as sensitive.
pub const SENSITIVE_KEY_FRAGMENTS: [&str; 5] = ["secret", "password", "token", "key", "credential"];

/// Characters percent-encoded in outbound baggage values (W3C `baggage-octet` complement).
const VALUE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Characters percent-encoded in outbound baggage keys; adds `=` to the value set.
const KEY_ENCODE_SET: &AsciiSet = &VALUE_ENCODE_SET.add(b'=');

/// Returns `true` if `key` should be withheld from lower-trust projections.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Baggage entries with unique keys.
///
/// Backed by a `BTreeMap` so iteration and serialization are deterministic;
/// entry order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Baggage(BTreeMap<String, String>);

impl Baggage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry after trimming key and value.
    ///
    /// Returns `false` (and stores nothing) when either is empty after trimming.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> bool {
        let key = key.as_ref().trim();
        let value = value.as_ref().trim();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.0.insert(key.to_string(), value.to_string());
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses a W3C `baggage` header value.
    ///
    /// Properties after `;` are ignored; keys and values are percent-decoded.
    /// Entries without `=`, or with an empty key or value, are skipped
    /// individually; the rest of the header is still parsed.
    #[must_use]
    pub fn parse_header(header: &str) -> Self {
        let mut baggage = Self::new();
        baggage.extend_from_header(header);
        baggage
    }

    /// Adds the entries of a W3C `baggage` header value, overriding existing keys.
    pub fn extend_from_header(&mut self, header: &str) {
        for entry in header.split(',') {
            let member = entry.split(';').next().unwrap_or_default();
            let Some((key, raw_value)) = member.split_once('=') else {
                tracing::trace!(entry, "skipping malformed baggage entry");
                continue;
            };
            let key = percent_decode_str(key.trim()).decode_utf8_lossy();
            let value = percent_decode_str(raw_value.trim()).decode_utf8_lossy();
            if !self.insert(key, value) {
                tracing::trace!(entry, "skipping empty baggage entry");
            }
        }
    }

    /// Applies individually prefixed baggage headers, overriding existing keys.
    ///
    /// Names without the `X-Baggage-` prefix are ignored. The suffix is the
    /// literal key; blank values are dropped.
    pub fn apply_prefixed<'a, I>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            if let Some(key) = strip_baggage_prefix(name) {
                self.insert(key, value);
            }
        }
    }

    /// Builds baggage from both inbound encodings, header first, prefixed entries second.
    #[must_use]
    pub fn from_sources<'a, I>(header: Option<&str>, prefixed: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut baggage = Self::new();
        if let Some(header) = header {
            baggage.extend_from_header(header);
        }
        baggage.apply_prefixed(prefixed);
        baggage
    }

    /// Merges `other` into `self`; entries from `other` win on key collisions.
    pub fn merge(&mut self, other: &Baggage) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Returns a copy without sensitive entries, for lower-trust consumers.
    ///
    /// This is advisory redaction, not a security boundary.
    #[must_use]
    pub fn filtered(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| !is_sensitive_key(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Encodes the entries as a W3C `baggage` header value.
    ///
    /// Keys and values are percent-encoded, so every entry survives
    /// [`Baggage::parse_header`]. Returns `None` for empty baggage.
    #[must_use]
    pub fn to_header(&self) -> Option<String> {
        let encoded: Vec<String> = self
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, KEY_ENCODE_SET),
                    utf8_percent_encode(value, VALUE_ENCODE_SET)
                )
            })
            .collect();
        (!encoded.is_empty()).then(|| encoded.join(","))
    }
}

impl FromIterator<(String, String)> for Baggage {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut baggage = Self::new();
        for (key, value) in iter {
            baggage.insert(key, value);
        }
        baggage
    }
}

impl From<BTreeMap<String, String>> for Baggage {
    fn from(entries: BTreeMap<String, String>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Baggage> for BTreeMap<String, String> {
    fn from(baggage: Baggage) -> Self {
        baggage.0
    }
}

impl<'a> IntoIterator for &'a Baggage {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
