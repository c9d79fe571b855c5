//! Header value objects shared by requests and responses.
//!
//! Header names compare case-insensitively. Some names may appear at most once in a
//! response, see [`must_be_present_once`].

use std::fmt;

/// Header names that may appear only once in a header list.
const ONLY_ONCE: &[&str] = &[
    "Accept-Ranges",
    "Access-Control-Allow-Credentials",
    "Access-Control-Allow-Headers",
    "Access-Control-Allow-Methods",
    "Access-Control-Allow-Origin",
    "Access-Control-Max-Age",
    "Connection",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Length",
    "Content-Type",
    "Date",
    "ETag",
    "Last-Modified",
    "Location",
    "Retry-After",
    "Transfer-Encoding",
    "Upgrade",
    "WWW-Authenticate",
];

/// Whether a header with this name is constrained to a single occurrence.
pub fn must_be_present_once(name: &str) -> bool {
    ONLY_ONCE.iter().any(|once| once.eq_ignore_ascii_case(name))
}

/// One `Name: Value` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Parses a single header line without its line terminator.
    ///
    /// Returns `None` for an empty line, a line containing CR or LF, a line without a
    /// colon or a line with an empty name. A single space after the colon is skipped,
    /// nothing else is trimmed.
    pub fn parse(line: &str) -> Option<Self> {
        if line.is_empty() || line.contains(['\r', '\n']) {
            return None;
        }
        let (name, value) = line.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        let value = value.strip_prefix(' ').unwrap_or(value);
        Some(Self::new(name, value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// An ordered header list, duplicates allowed unless the name is once-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.inner.iter()
    }

    /// First header with the given name.
    pub fn get(&self, name: &str) -> Option<&Header> {
        self.inner.iter().find(|h| h.is_named(name))
    }

    pub fn get_index(&self, index: usize) -> Option<&Header> {
        self.inner.get(index)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(Header::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All values for the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner.iter().filter(move |h| h.is_named(name)).map(Header::value)
    }

    /// Appends a header without any duplicate check. Used for request headers.
    pub fn push(&mut self, header: Header) {
        self.inner.push(header);
    }

    /// Adds a header.
    ///
    /// If a header with the same name exists: with `replace` it is removed and the new one
    /// appended; otherwise a once-only name rejects the new header (returns `false`) and
    /// any other name is appended as a duplicate. Invalid headers are rejected.
    pub fn add(&mut self, header: Header, replace: bool) -> bool {
        if !header.is_valid() {
            return false;
        }
        if let Some(index) = self.inner.iter().position(|h| h.is_named(header.name())) {
            if replace {
                self.inner.remove(index);
            } else if must_be_present_once(header.name()) {
                return false;
            }
        }
        self.inner.push(header);
        true
    }

    /// Removes every header with the given name, returns whether any was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|h| !h.is_named(name));
        before != self.inner.len()
    }

    /// Removes headers matching both name (case-insensitive) and value (exact).
    pub fn remove_value(&mut self, name: &str, value: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|h| !(h.is_named(name) && h.value() == value));
        before != self.inner.len()
    }

    /// Keeps only the headers accepted by the predicate.
    pub fn retain(&mut self, f: impl FnMut(&Header) -> bool) {
        self.inner.retain(f);
    }

    /// Inserts `defaults` in front of the list, skipping names already present.
    pub fn prepend_missing<'a>(&mut self, defaults: impl IntoIterator<Item = &'a Header>) {
        let missing: Vec<Header> = defaults.into_iter().filter(|d| !self.contains(d.name())).cloned().collect();
        if !missing.is_empty() {
            self.inner.splice(0..0, missing);
        }
    }

    /// Number of bytes the list occupies on the wire, `Name: Value\r\n` each.
    pub fn wire_len(&self) -> usize {
        self.inner.iter().map(|h| h.name.len() + h.value.len() + 4).sum()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Self { inner: iter.into_iter().collect() }
    }
}
