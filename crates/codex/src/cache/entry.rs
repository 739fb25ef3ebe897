//! # Cache Entry
//!
//! A cache entry carries one cached artifact together with the validation
//! metadata needed for TTL expiry and conditional revalidation. Entries do
//! no I/O themselves; persistence lives in the store.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::storage::{DEFAULT_CONTENT_TYPE, decode_text};

/// One cached artifact plus its validation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Unique cache key, derived from the source path
    pub key: String,
    /// The cached content
    pub content: Bytes,
    /// MIME type of the content
    pub content_type: String,
    /// Character encoding
    pub encoding: Option<String>,
    /// Entity tag for validation
    pub etag: Option<String>,
    /// Original last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// When the content was fetched
    pub fetched_at: DateTime<Utc>,
    /// When the entry expires; `None` means it never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Time-to-live in seconds
    pub ttl: u64,
    /// Content size in bytes
    pub size: u64,
    /// Provider-specific metadata
    pub metadata: Map<String, Value>,
    /// Number of cache hits
    pub hit_count: u64,
    /// Original source (provider name, URL, ...)
    pub source: Option<String>,
}

pub const DEFAULT_TTL_SECS: u64 = 3600;

impl CacheEntry {
    /// Create an entry fetched now, with the default one-hour TTL.
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let fetched_at = Utc::now();
        let size = content.len() as u64;

        Self {
            key: key.into(),
            content,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            encoding: Some("utf-8".to_string()),
            etag: None,
            last_modified: None,
            fetched_at,
            expires_at: expiry(fetched_at, DEFAULT_TTL_SECS),
            ttl: DEFAULT_TTL_SECS,
            size,
            metadata: Map::new(),
            hit_count: 0,
            source: None,
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

    /// Set the TTL; the expiry is recomputed from `fetched_at`.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self.expires_at = expiry(self.fetched_at, ttl);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether the entry has passed its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Whether the entry is still fresh.
    pub fn is_fresh(&self) -> bool {
        !self.is_expired()
    }

    /// Age in seconds since the content was fetched.
    pub fn age(&self) -> f64 {
        (Utc::now() - self.fetched_at).num_milliseconds() as f64 / 1000.0
    }

    /// Remaining seconds until expiry; unbounded entries report infinity.
    pub fn remaining_ttl(&self) -> f64 {
        match self.expires_at {
            Some(at) => ((at - Utc::now()).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => f64::INFINITY,
        }
    }

    /// Record a cache hit.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
    }

    /// Replace the content and restart the TTL window.
    pub fn refresh(&mut self, new_content: impl Into<Bytes>, new_ttl: Option<u64>) {
        self.content = new_content.into();
        self.size = self.content.len() as u64;
        self.fetched_at = Utc::now();

        if let Some(ttl) = new_ttl {
            self.ttl = ttl;
        }
        self.expires_at = expiry(self.fetched_at, self.ttl);
    }

    /// Deterministic content digest used for corruption checks on load.
    ///
    /// Stable and cheap; not a security primitive.
    pub fn content_digest(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }

    /// Content decoded as text using the declared encoding.
    pub fn text(&self) -> Result<String, CacheError> {
        decode_text(&self.content, self.encoding.as_deref())
    }

    /// Serializable metadata record (everything except the content).
    pub fn metadata_record(&self) -> EntryRecord {
        EntryRecord {
            key: self.key.clone(),
            content_type: self.content_type.clone(),
            encoding: self.encoding.clone(),
            etag: self.etag.clone(),
            last_modified: self.last_modified,
            fetched_at: self.fetched_at,
            expires_at: self.expires_at,
            ttl: self.ttl,
            size: self.size,
            metadata: self.metadata.clone(),
            hit_count: self.hit_count,
            source: self.source.clone(),
            content_digest: self.content_digest(),
        }
    }

    /// Rebuild an entry from a persisted record and its content bytes.
    ///
    /// Missing optional fields fall back to their defaults; a missing
    /// expiry is recomputed from `fetched_at` and the TTL.
    pub fn from_record(record: EntryRecord, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let size = if record.size == 0 {
            content.len() as u64
        } else {
            record.size
        };
        let expires_at = record
            .expires_at
            .or_else(|| expiry(record.fetched_at, record.ttl));

        Self {
            key: record.key,
            content,
            content_type: record.content_type,
            encoding: record.encoding,
            etag: record.etag,
            last_modified: record.last_modified,
            fetched_at: record.fetched_at,
            expires_at,
            ttl: record.ttl,
            size,
            metadata: record.metadata,
            hit_count: record.hit_count,
            source: record.source,
        }
    }
}

fn expiry(fetched_at: DateTime<Utc>, ttl: u64) -> Option<DateTime<Utc>> {
    (ttl > 0).then(|| fetched_at + Duration::seconds(ttl as i64))
}

/// Persisted sidecar form of a cache entry (content excluded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub key: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_encoding")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub content_digest: String,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_encoding() -> Option<String> {
    Some("utf-8".to_string())
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

/// Generate a cache key from a source path.
///
/// Strips known URI scheme prefixes, normalizes separators, and applies
/// an optional provider namespace so different providers never collide.
pub fn generate_cache_key(path: &str, provider: Option<&str>) -> String {
    let mut key = path.trim().to_string();

    for prefix in ["codex://", "http://", "https://", "file://"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            key = rest.to_string();
            break;
        }
    }

    key = key.replace('\\', "/");

    if let Some(provider) = provider {
        key = format!("{provider}/{key}");
    }

    key.trim_start_matches('/').to_string()
}
