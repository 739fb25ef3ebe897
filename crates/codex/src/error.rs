use reqwest::StatusCode;
use std::io;
use std::time::Duration;

/// Errors raised by storage providers and the storage manager.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("access denied: {path}")]
    AccessDenied { path: String },

    #[error("rate limited: {url}")]
    RateLimited {
        url: String,
        retry_after: Option<String>,
    },

    #[error("request timed out after {timeout:?}: {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP error {status}: {url}")]
    Http { url: String, status: StatusCode },

    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("path is not a file: {path}")]
    NotAFile { path: String },

    #[error("path traversal attempt: {path}")]
    PathTraversal { path: String },

    #[error("cannot resolve relative path without a base URL: {path}")]
    NoBaseUrl { path: String },

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("GitHub authentication failed")]
    AuthFailed,

    #[error("storage provider '{name}' has been closed")]
    ProviderClosed { name: String },

    #[error("no storage providers registered")]
    NoProviders,

    #[error("provider '{name}' is not registered")]
    ProviderNotFound { name: String },

    #[error("provider '{name}' is already registered")]
    DuplicateProvider { name: String },

    #[error("all providers failed to fetch {path}: {summary}")]
    AllProvidersFailed { path: String, summary: String },
}

/// Errors raised by the cache persistence layer and the cache manager.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to write cache entry '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize metadata for cache entry '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache manager has been closed")]
    ManagerClosed,

    #[error("content is not valid {encoding}")]
    Decode { encoding: String },
}

/// Errors raised while parsing or building codex:// references.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("URI cannot be empty")]
    Empty,

    #[error("invalid URI: must start with 'codex://': {uri}")]
    InvalidPrefix { uri: String },

    #[error("URI must have format codex://org/project/path: {uri}")]
    InvalidFormat { uri: String },

    #[error("invalid organization name: '{name}'")]
    InvalidOrg { name: String },

    #[error("invalid project name: '{name}'")]
    InvalidProject { name: String },

    #[error("{field} too long: {length} chars (max {max})")]
    TooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("not a legacy reference: must start with '$ref:': {reference}")]
    NotLegacy { reference: String },

    #[error("legacy reference path cannot be empty")]
    EmptyLegacyPath,
}

/// Umbrella error for the caller-facing cache API.
#[derive(Debug, thiserror::Error)]
pub enum CodexError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}
