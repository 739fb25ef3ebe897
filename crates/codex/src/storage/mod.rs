//! # Storage Backends
//!
//! Pluggable storage providers behind the [`StorageProvider`] trait, plus
//! a manager that routes between them with priority-based fallback.

mod github;
mod http;
mod local;
mod manager;
mod provider;

pub use github::GitHubStorage;
pub use http::HttpStorage;
pub use local::LocalStorage;
pub use manager::StorageManager;
pub use provider::{DEFAULT_CONTENT_TYPE, FetchOptions, FetchResult, StorageProvider};

pub(crate) use provider::decode_text;
