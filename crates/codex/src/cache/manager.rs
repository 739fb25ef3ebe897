//! # Cache Manager
//!
//! The caller-facing cache API. The manager decides per fetch whether to
//! serve from cache, revalidate conditionally, or refetch, owns TTL policy
//! through the injected type registry, and triggers opportunistic cleanup
//! of expired entries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::error::{CacheError, CodexError};
use crate::storage::{FetchOptions, FetchResult, StorageProvider};
use crate::types::TypeRegistry;

use super::entry::{CacheEntry, generate_cache_key};
use super::store::{FileCacheStore, StoreStats};

/// Configuration for the cache manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for cache files; defaults to the platform cache dir
    pub cache_dir: Option<PathBuf>,
    /// Default TTL in seconds, reported in stats
    pub default_ttl: u64,
    /// Maximum cache entries before cleanup
    pub max_entries: usize,
    /// Interval between opportunistic cleanups
    pub cleanup_interval: Duration,
    /// Maximum raw key length before keys collapse to a hashed form
    pub max_key_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            default_ttl: 3600,
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(3600),
            max_key_length: 200,
        }
    }
}

/// Per-call fetch parameters.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Manual TTL override; the type registry decides otherwise
    pub ttl: Option<u64>,
    /// Bypass the cache and refetch, overwriting the cached value
    pub force_refresh: bool,
    /// Options forwarded to the storage provider
    pub options: Option<FetchOptions>,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Cache statistics: the store scan plus the manager config snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub default_ttl: u64,
    pub max_entries: usize,
    pub cleanup_interval_secs: u64,
    pub last_cleanup: DateTime<Utc>,
}

/// TTL-aware cache over a storage provider.
///
/// Holds no per-call state beyond the store and the cleanup bookkeeping,
/// so a single manager can serve many concurrent fetches.
pub struct CacheManager {
    store: FileCacheStore,
    registry: TypeRegistry,
    config: CacheConfig,
    closed: AtomicBool,
    last_cleanup: Mutex<DateTime<Utc>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create a manager with default configuration and the built-in type
    /// registry.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default(), TypeRegistry::with_builtins())
    }

    /// Create a manager with explicit configuration and an owned registry.
    pub fn with_config(config: CacheConfig, registry: TypeRegistry) -> Self {
        let cache_dir = config.cache_dir.clone().unwrap_or_else(default_cache_dir);
        let store = FileCacheStore::new(cache_dir).with_max_key_length(config.max_key_length);

        Self {
            store,
            registry,
            config,
            closed: AtomicBool::new(false),
            last_cleanup: Mutex::new(Utc::now()),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Fetch content with caching.
    ///
    /// Fresh entries are served directly. Stale entries are revalidated
    /// conditionally with the stored validators, falling back to the stale
    /// content when the provider fails. Misses (and `force_refresh`) go to
    /// the provider; a provider failure falls back to any cached entry, or
    /// re-raises when none exists.
    pub async fn fetch(
        &self,
        path: &str,
        storage: &dyn StorageProvider,
        request: FetchRequest,
    ) -> Result<FetchResult, CodexError> {
        self.ensure_open()?;

        let cache_key = generate_cache_key(path, None);

        if !request.force_refresh
            && let Some(mut entry) = self.store.get(&cache_key).await
        {
            if entry.is_fresh() {
                entry.record_hit();
                self.store.put(&entry).await?;
                return Ok(entry_to_result(&entry, true, false));
            }

            // Stale entry: attempt conditional revalidation
            match self
                .conditional_fetch(path, storage, &mut entry, request.options.as_ref())
                .await
            {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(CodexError::Storage(e)) => {
                    debug!(key = %cache_key, error = %e, "Revalidation failed, serving stale entry");
                    return Ok(entry_to_result(&entry, true, true));
                }
                Err(other) => return Err(other),
            }
        }

        // Cache miss or forced refresh
        let result = match storage.fetch(path, request.options.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                if let Some(entry) = self.store.get(&cache_key).await {
                    debug!(key = %cache_key, error = %e, "Fetch failed, serving stale entry");
                    return Ok(entry_to_result(&entry, true, true));
                }
                return Err(e.into());
            }
        };

        let ttl = match request.ttl {
            Some(ttl) => ttl,
            None => self.ttl_for(path),
        };
        let source = result
            .metadata
            .get("provider")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let entry = CacheEntry::new(cache_key, result.content.clone())
            .with_content_type(result.content_type.clone())
            .with_encoding_option(result.encoding.clone())
            .with_etag_option(result.etag.clone())
            .with_last_modified_option(result.last_modified)
            .with_ttl(ttl)
            .with_metadata(result.metadata.clone())
            .with_source(source);

        self.store.put(&entry).await?;
        self.maybe_cleanup();

        Ok(result)
    }

    /// Get the cached entry for a path without fetching.
    pub async fn get_cached(&self, path: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.ensure_open()?;
        Ok(self.store.get(&generate_cache_key(path, None)).await)
    }

    /// Whether a path is cached at all (fresh or stale).
    pub async fn is_cached(&self, path: &str) -> Result<bool, CacheError> {
        Ok(self.get_cached(path).await?.is_some())
    }

    /// Whether a path has fresh cached content.
    pub async fn is_fresh(&self, path: &str) -> Result<bool, CacheError> {
        Ok(self
            .get_cached(path)
            .await?
            .is_some_and(|entry| entry.is_fresh()))
    }

    /// Delete the cached entry for a path. Returns true if one existed.
    pub async fn invalidate(&self, path: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        Ok(self.store.delete(&generate_cache_key(path, None)).await)
    }

    /// Delete every entry whose key matches a glob pattern. Returns the
    /// number deleted.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.ensure_open()?;

        let Ok(regex) = crate::patterns::compile_pattern(pattern) else {
            return Ok(0);
        };

        let mut count = 0;
        for key in self.store.keys().await {
            if regex.is_match(&key) && self.store.delete(&key).await {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Delete every cache entry. Returns the number deleted.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.ensure_open()?;
        Ok(self.store.clear().await)
    }

    /// Remove expired entries. Returns the number removed.
    pub async fn cleanup(&self, max_age: Option<u64>) -> Result<usize, CacheError> {
        self.ensure_open()?;

        // TODO: prune by max_age and enforce max_entries once a retention
        // policy beyond TTL expiry is decided
        let _ = max_age;

        let count = self.store.clear_expired().await;
        *self.last_cleanup.lock() = Utc::now();
        Ok(count)
    }

    /// Cache statistics merged with the manager configuration.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.ensure_open()?;

        Ok(CacheStats {
            store: self.store.stats().await,
            default_ttl: self.config.default_ttl,
            max_entries: self.config.max_entries,
            cleanup_interval_secs: self.config.cleanup_interval.as_secs(),
            last_cleanup: *self.last_cleanup.lock(),
        })
    }

    /// Close the manager. Any in-flight background cleanup is cancelled
    /// without surfacing the cancellation; all later operations fail with
    /// a closed error.
    pub async fn close(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::ManagerClosed);
        }
        Ok(())
    }

    /// TTL for a path via the type registry, keyed on the underlying file
    /// path (scheme and host stripped).
    fn ttl_for(&self, path: &str) -> u64 {
        let file_path = if let Some(rest) = path.strip_prefix("codex://") {
            rest.splitn(3, '/').nth(2).unwrap_or(rest).to_string()
        } else if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
                .map(|url| url.path().to_string())
                .unwrap_or_else(|_| path.to_string())
        } else {
            path.to_string()
        };

        self.registry.get_ttl(&file_path)
    }

    /// Revalidate a stale entry with its stored validators.
    ///
    /// Returns the refreshed result when the origin reports the content
    /// unchanged, `None` when a full refetch is needed.
    async fn conditional_fetch(
        &self,
        path: &str,
        storage: &dyn StorageProvider,
        entry: &mut CacheEntry,
        options: Option<&FetchOptions>,
    ) -> Result<Option<FetchResult>, CodexError> {
        let mut conditional = FetchOptions::default();
        if let Some(options) = options {
            conditional.timeout = options.timeout;
            conditional.headers = options.headers.clone();
        }
        conditional.if_none_match = entry.etag.clone();
        conditional.if_modified_since = entry.last_modified;

        let result = storage
            .fetch(path, Some(&conditional))
            .await
            .map_err(CodexError::Storage)?;

        let unchanged =
            result.not_modified() || (result.etag.is_some() && result.etag == entry.etag);
        if unchanged {
            // Same bytes, fresh TTL window
            let content = entry.content.clone();
            entry.refresh(content, None);
            self.store.put(entry).await?;
            return Ok(Some(entry_to_result(entry, true, false)));
        }

        Ok(None)
    }

    /// Spawn a fire-and-forget expiry sweep when the cleanup interval has
    /// elapsed. The triggering fetch never waits on it.
    fn maybe_cleanup(&self) {
        let now = Utc::now();
        {
            let mut last = self.last_cleanup.lock();
            let elapsed = (now - *last).num_seconds();
            if elapsed < self.config.cleanup_interval.as_secs() as i64 {
                return;
            }
            *last = now;
        }

        let mut task = self.cleanup_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let store = self.store.clone();
        *task = Some(tokio::spawn(async move {
            let removed = store.clear_expired().await;
            if removed > 0 {
                debug!(removed, "Background cleanup removed expired cache entries");
            }
        }));
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a caller-facing result from a cache entry, tagged with cache
/// provenance in the metadata bag.
fn entry_to_result(entry: &CacheEntry, from_cache: bool, stale: bool) -> FetchResult {
    let mut metadata = entry.metadata.clone();
    metadata.insert("from_cache".to_string(), from_cache.into());
    metadata.insert("cache_key".to_string(), entry.key.clone().into());
    metadata.insert("cache_age".to_string(), entry.age().into());
    metadata.insert("cache_hits".to_string(), entry.hit_count.into());
    if stale {
        metadata.insert("stale".to_string(), true.into());
    }

    FetchResult::new(entry.content.clone())
        .with_content_type(entry.content_type.clone())
        .with_encoding_option(entry.encoding.clone())
        .with_etag_option(entry.etag.clone())
        .with_last_modified_option(entry.last_modified)
        .with_metadata(metadata)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("codex"))
        .unwrap_or_else(|| std::env::temp_dir().join("codex-cache"))
}
