//! # Storage Manager
//!
//! Coordinates multiple storage providers with priority-based fallback:
//! requests are routed by explicit provider name or by path shape, and on
//! failure the next provider in priority order is tried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::StorageError;

use super::provider::{FetchOptions, FetchResult, StorageProvider};

struct Registered {
    name: String,
    provider: Arc<dyn StorageProvider>,
    /// Lower value = tried first
    priority: i32,
}

/// Manager for coordinating multiple storage providers.
pub struct StorageManager {
    providers: Vec<Registered>,
    default_provider: Option<String>,
    closed: AtomicBool,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Prefer the named provider for paths whose shape is indeterminate.
    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    fn ensure_not_closed(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StorageError::ProviderClosed {
                name: "storage-manager".to_string(),
            });
        }
        Ok(())
    }

    /// Register a storage provider under a unique name.
    ///
    /// Lower priority values are tried first (default 100).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn StorageProvider>,
        priority: i32,
    ) -> Result<(), StorageError> {
        self.ensure_not_closed()?;

        let name = name.into();
        if self.providers.iter().any(|r| r.name == name) {
            return Err(StorageError::DuplicateProvider { name });
        }

        self.providers.push(Registered {
            name,
            provider,
            priority,
        });
        self.providers.sort_by_key(|r| r.priority);
        Ok(())
    }

    /// Unregister a provider, returning it if present.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn StorageProvider>> {
        let index = self.providers.iter().position(|r| r.name == name)?;
        Some(self.providers.remove(index).provider)
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn StorageProvider>> {
        self.providers
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.provider.clone())
    }

    /// Registered provider names in priority order.
    pub fn list_providers(&self) -> Vec<&str> {
        self.providers.iter().map(|r| r.name.as_str()).collect()
    }

    /// Fetch content, routing to the appropriate provider.
    ///
    /// With `fallback`, providers are tried in priority order (preferred
    /// path type first) until one succeeds; without it, only the first
    /// candidate is consulted.
    pub async fn fetch(
        &self,
        path: &str,
        provider: Option<&str>,
        options: Option<&FetchOptions>,
        fallback: bool,
    ) -> Result<FetchResult, StorageError> {
        self.ensure_not_closed()?;

        if self.providers.is_empty() {
            return Err(StorageError::NoProviders);
        }

        let candidates = self.select_providers(path, provider)?;
        let mut errors: Vec<(String, StorageError)> = Vec::new();

        for registered in candidates {
            match registered.provider.fetch(path, options).await {
                Ok(mut result) => {
                    result
                        .metadata
                        .insert("storage_provider".to_string(), registered.name.clone().into());
                    return Ok(result);
                }
                Err(e) => {
                    debug!(provider = %registered.name, error = %e, "Provider fetch failed");
                    if !fallback {
                        return Err(e);
                    }
                    errors.push((registered.name.clone(), e));
                }
            }
        }

        if errors.len() == 1 {
            let (_, error) = errors.remove(0);
            return Err(error);
        }

        let summary = errors
            .iter()
            .map(|(name, e)| format!("{name}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(StorageError::AllProvidersFailed {
            path: path.to_string(),
            summary,
        })
    }

    /// Check whether a path exists in any candidate provider.
    pub async fn exists(&self, path: &str, provider: Option<&str>) -> bool {
        if self.ensure_not_closed().is_err() {
            return false;
        }

        let Ok(candidates) = self.select_providers(path, provider) else {
            return false;
        };

        for registered in candidates {
            if registered.provider.exists(path).await {
                return true;
            }
        }
        false
    }

    /// Close every registered provider.
    pub async fn close(&mut self) {
        for registered in &self.providers {
            registered.provider.close().await;
        }
        self.providers.clear();
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Candidate providers for a path, in try order.
    fn select_providers(
        &self,
        path: &str,
        explicit: Option<&str>,
    ) -> Result<Vec<&Registered>, StorageError> {
        if let Some(name) = explicit {
            return match self.providers.iter().find(|r| r.name == name) {
                Some(registered) => Ok(vec![registered]),
                None => Err(StorageError::ProviderNotFound {
                    name: name.to_string(),
                }),
            };
        }

        // Put providers matching the detected path type first, keeping
        // priority order within each group.
        if let Some(path_type) = detect_provider_type(path) {
            let (mut preferred, others): (Vec<_>, Vec<_>) = self
                .providers
                .iter()
                .partition(|r| r.name.to_lowercase().contains(path_type));
            preferred.extend(others);
            return Ok(preferred);
        }

        if let Some(default) = &self.default_provider
            && self.providers.iter().any(|r| &r.name == default)
        {
            let mut ordered: Vec<&Registered> =
                self.providers.iter().filter(|r| &r.name == default).collect();
            ordered.extend(self.providers.iter().filter(|r| &r.name != default));
            return Ok(ordered);
        }

        Ok(self.providers.iter().collect())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Detect the provider type a path shape implies.
///
/// Bare single-segment names are indeterminate, which lets the configured
/// default provider lead the try order.
fn detect_provider_type(path: &str) -> Option<&'static str> {
    if path.starts_with("codex://") {
        return Some("github");
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some("http");
    }
    if path.starts_with('/') || path.starts_with('.') {
        return Some("local");
    }

    if path.contains('/') {
        // org/repo/... shapes route to github; everything else stays local
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() >= 3 && !parts[..2].iter().any(|p| p.starts_with('.')) {
            return Some("github");
        }
        return Some("local");
    }

    None
}
