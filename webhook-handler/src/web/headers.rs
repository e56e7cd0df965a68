//! Case-insensitive header access.
//!
//! The verifier only needs string lookups by name, so it reads headers through
//! [`HeaderLookup`] instead of a transport library's request type.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::http::HeaderMap;

/// Header carrying the `sha1=<hex>` body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Header naming the event type (`push`, `issues`, ...).
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the sender's unique delivery id.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Read-only, case-insensitive header lookup.
pub trait HeaderLookup {
    /// Return the value for `name`, matching the name case-insensitively.
    ///
    /// A value that is present but not valid UTF-8 is returned lossily
    /// decoded rather than hidden.
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;
}

/// Owned header set keyed by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: HashMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HeaderLookup for HeaderSet {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderSet
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

impl From<&HeaderMap> for HeaderSet {
    /// Copy the headers of an HTTP request, decoding values the same way
    /// as [`HeaderLookup`] for [`HeaderMap`].
    fn from(map: &HeaderMap) -> Self {
        map.iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes())))
            .collect()
    }
}

impl HeaderLookup for HeaderMap {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        // HeaderMap names are already case-insensitive
        self.get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
    }
}

/// Look up a header and treat an empty value as absent.
pub(crate) fn non_empty<'a, H>(headers: &'a H, name: &str) -> Option<Cow<'a, str>>
where
    H: HeaderLookup + ?Sized,
{
    headers.header(name).filter(|v| !v.is_empty())
}
