//! # Storage Provider
//!
//! This module defines the storage provider trait that all storage
//! backends implement, along with the fetch option/result types shared by
//! every backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{CacheError, StorageError};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Options for fetch operations.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Request timeout
    pub timeout: Duration,
    /// Additional headers to send
    pub headers: HashMap<String, String>,
    /// ETag for conditional requests (origin reports unchanged on match)
    pub if_none_match: Option<String>,
    /// Timestamp for conditional requests
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Whether to follow HTTP redirects
    pub follow_redirects: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
            if_none_match: None,
            if_modified_since: None,
            follow_redirects: true,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    pub fn with_if_modified_since(mut self, timestamp: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(timestamp);
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

/// Result of a storage fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The fetched content
    pub content: Bytes,
    /// MIME type of the content (e.g. `text/markdown`)
    pub content_type: String,
    /// Character encoding (e.g. `utf-8`)
    pub encoding: Option<String>,
    /// Entity tag for cache validation
    pub etag: Option<String>,
    /// Last modification timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// Content size in bytes
    pub size: u64,
    /// Provider-specific metadata (provenance, status, cache tags)
    pub metadata: Map<String, Value>,
}

impl FetchResult {
    /// Create a result from content bytes; size is derived.
    pub fn new(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let size = content.len() as u64;
        Self {
            content,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            encoding: Some("utf-8".to_string()),
            etag: None,
            last_modified: None,
            size,
            metadata: Map::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_encoding_option(mut self, encoding: Option<String>) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_etag_option(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_last_modified_option(mut self, last_modified: Option<DateTime<Utc>>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content decoded as text using the declared encoding.
    ///
    /// Fails with a decode error when the bytes are not valid under the
    /// declared encoding (only UTF-8 family encodings are decodable).
    pub fn text(&self) -> Result<String, CacheError> {
        decode_text(&self.content, self.encoding.as_deref())
    }

    /// Whether this result signals unchanged content for a conditional
    /// request.
    pub fn not_modified(&self) -> bool {
        self.metadata
            .get("not_modified")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this result was served from the cache layer.
    pub fn from_cache(&self) -> bool {
        self.metadata
            .get("from_cache")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this result is a stale cache fallback.
    pub fn is_stale(&self) -> bool {
        self.metadata
            .get("stale")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Decode bytes as text under a declared encoding name.
pub(crate) fn decode_text(content: &[u8], encoding: Option<&str>) -> Result<String, CacheError> {
    let name = encoding.unwrap_or("utf-8");
    match name.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => std::str::from_utf8(content)
            .map(|s| s.to_string())
            .map_err(|_| CacheError::Decode {
                encoding: name.to_string(),
            }),
        _ => Err(CacheError::Decode {
            encoding: name.to_string(),
        }),
    }
}

/// A storage backend the cache layer can fetch through.
///
/// Backends are polymorphic over this capability set; the cache and
/// storage managers depend only on the trait, never on a concrete backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Fetch content from storage.
    async fn fetch(
        &self,
        path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError>;

    /// Check whether a path exists in storage.
    async fn exists(&self, path: &str) -> bool;

    /// Release any held resources. Further calls fail with a closed error.
    async fn close(&self);

    /// Provider name for logging and metadata provenance.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_derived_from_content() {
        let result = FetchResult::new(&b"# Hello"[..]);
        assert_eq!(result.size, 7);
        assert_eq!(result.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn text_decodes_utf8() {
        let result = FetchResult::new(&b"# Hello"[..]);
        assert_eq!(result.text().unwrap(), "# Hello");
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let result = FetchResult::new(&[0xff, 0xfe, 0x01][..]);
        assert!(matches!(result.text(), Err(CacheError::Decode { .. })));
    }

    #[test]
    fn text_rejects_unsupported_encoding() {
        let result =
            FetchResult::new(&b"abc"[..]).with_encoding_option(Some("shift-jis".to_string()));
        assert!(matches!(result.text(), Err(CacheError::Decode { .. })));
    }

    #[test]
    fn metadata_flags_default_to_false() {
        let result = FetchResult::new(&b"x"[..]);
        assert!(!result.not_modified());
        assert!(!result.from_cache());
        assert!(!result.is_stale());

        let tagged = FetchResult::new(&b"x"[..])
            .with_metadata_entry("not_modified", true)
            .with_metadata_entry("from_cache", true)
            .with_metadata_entry("stale", true);
        assert!(tagged.not_modified());
        assert!(tagged.from_cache());
        assert!(tagged.is_stale());
    }

    #[test]
    fn fetch_options_builders() {
        let when = Utc::now();
        let options = FetchOptions::new()
            .with_timeout(Duration::from_secs(5))
            .with_header("X-Test", "1")
            .with_if_none_match("\"abc\"")
            .with_if_modified_since(when)
            .with_follow_redirects(false);

        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.headers.get("X-Test").map(String::as_str), Some("1"));
        assert_eq!(options.if_none_match.as_deref(), Some("\"abc\""));
        assert_eq!(options.if_modified_since, Some(when));
        assert!(!options.follow_redirects);
    }
}
