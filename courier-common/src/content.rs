use std::{fmt::Debug, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::ContentError;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Parsed {
    headers: Vec<(String, String)>,
    body_offset: usize,
}

/// The raw RFC 5322 message plus a lazily parsed header view.
///
/// Only the raw bytes are persisted; the header view is rebuilt on first use
/// after a mail is loaded from a repository, and discarded whenever the raw
/// bytes change.
#[derive(Default, Serialize, Deserialize)]
pub struct Content {
    raw: Vec<u8>,
    #[serde(skip)]
    parsed: OnceLock<Result<Parsed, ContentError>>,
}

impl Content {
    #[must_use]
    pub const fn new(raw: Vec<u8>) -> Self {
        Self {
            raw,
            parsed: OnceLock::new(),
        }
    }

    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Replaces the message bytes, invalidating the parsed view
    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = raw;
        self.parsed = OnceLock::new();
    }

    fn parsed(&self) -> Result<&Parsed, ContentError> {
        self.parsed
            .get_or_init(|| {
                let (headers, body_offset) = mailparse::parse_headers(&self.raw)
                    .map_err(|err| ContentError::MalformedHeaders(err.to_string()))?;

                Ok(Parsed {
                    headers: headers
                        .iter()
                        .map(|header| (header.get_key(), header.get_value()))
                        .collect(),
                    body_offset,
                })
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// All headers in message order, values decoded.
    pub fn headers(&self) -> Result<&[(String, String)], ContentError> {
        self.parsed().map(|parsed| parsed.headers.as_slice())
    }

    /// The first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Result<Option<&str>, ContentError> {
        Ok(self
            .headers()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str()))
    }

    /// Everything after the header block.
    pub fn body(&self) -> Result<&[u8], ContentError> {
        let offset = self.parsed()?.body_offset;
        Ok(self.raw.get(offset..).unwrap_or_default())
    }

    /// Prepends a header line to the message.
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        let mut raw = Vec::with_capacity(self.raw.len() + name.len() + value.len() + 4);
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(&self.raw);
        self.set_raw(raw);
    }
}

impl Clone for Content {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            parsed: self.parsed.clone(),
        }
    }
}

impl PartialEq for Content {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Content {}

impl Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content")
            .field("len", &self.raw.len())
            .field("parsed", &self.parsed.get().is_some())
            .finish()
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<&[u8]> for Content {
    fn from(value: &[u8]) -> Self {
        Self::new(value.to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] =
        b"From: alice@example.com\r\nSubject: Hello there\r\nX-Spam: yes\r\n\r\nBody text\r\n";

    #[test]
    fn test_headers_are_parsed_lazily() {
        let content = Content::from(MESSAGE);
        assert!(content.parsed.get().is_none());

        assert_eq!(content.header("subject").unwrap(), Some("Hello there"));
        assert!(content.parsed.get().is_some());
        assert_eq!(content.header("X-Missing").unwrap(), None);
        assert_eq!(content.headers().unwrap().len(), 3);
        assert_eq!(content.body().unwrap(), b"Body text\r\n");
    }

    #[test]
    fn test_prepend_header_resets_view() {
        let mut content = Content::from(MESSAGE);
        assert_eq!(content.headers().unwrap().len(), 3);

        content.prepend_header("X-Courier", "seen");
        assert!(content.parsed.get().is_none());
        assert_eq!(content.header("x-courier").unwrap(), Some("seen"));
        assert_eq!(content.headers().unwrap().len(), 4);
    }

    #[test]
    fn test_equality_ignores_cache() {
        let a = Content::from(MESSAGE);
        let b = Content::from(MESSAGE);
        let _ = a.headers();
        assert_eq!(a, b);
    }
}
