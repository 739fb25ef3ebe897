//! # Local Storage
//!
//! Storage provider backed by the local filesystem, resolving paths
//! relative to a base directory with a traversal guard.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::StorageError;
use crate::patterns::match_pattern;

use super::provider::{FetchOptions, FetchResult, StorageProvider};

pub struct LocalStorage {
    base_path: PathBuf,
    follow_symlinks: bool,
    closed: AtomicBool,
}

impl LocalStorage {
    /// Create a local provider rooted at `base_path`. Relative bases are
    /// resolved against the current working directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let base_path = if base_path.is_absolute() {
            base_path
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&base_path))
                .unwrap_or(base_path)
        };

        Self {
            base_path: normalize_lexically(&base_path),
            follow_symlinks: true,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn ensure_not_closed(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StorageError::ProviderClosed {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Resolve a relative path inside the base directory, rejecting
    /// anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = path.replace('\\', "/");
        let relative = relative.trim_start_matches('/');
        let resolved = normalize_lexically(&self.base_path.join(relative));

        if !resolved.starts_with(&self.base_path) {
            return Err(StorageError::PathTraversal {
                path: path.to_string(),
            });
        }

        Ok(resolved)
    }

    async fn read_file(&self, file_path: &Path, path: &str) -> Result<Bytes, StorageError> {
        match fs::read(file_path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::AccessDenied {
                    path: path.to_string(),
                })
            }
            Err(e) => Err(StorageError::Io {
                path: path.to_string(),
                source: e,
            }),
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn fetch(
        &self,
        path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError> {
        self.ensure_not_closed()?;

        let file_path = self.resolve(path)?;

        if !self.follow_symlinks && file_path.is_symlink() {
            return Err(StorageError::NotAFile {
                path: path.to_string(),
            });
        }

        let metadata = match fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => {
                return Err(StorageError::Io {
                    path: path.to_string(),
                    source: e,
                });
            }
        };

        if !metadata.is_file() {
            return Err(StorageError::NotAFile {
                path: path.to_string(),
            });
        }

        let content = self.read_file(&file_path, path).await?;

        let mtime: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::<Utc>::from);
        let (content_type, encoding) = guess_content_type(&file_path);
        let etag = content_etag(&content);

        // Conditional request support: etag equality, then mtime comparison
        if let Some(options) = options {
            let unchanged = options
                .if_none_match
                .as_deref()
                .is_some_and(|candidate| candidate == etag)
                || matches!(
                    (options.if_modified_since, mtime),
                    (Some(since), Some(modified)) if modified <= since
                );

            if unchanged {
                return Ok(FetchResult::new(Bytes::new())
                    .with_content_type(content_type)
                    .with_encoding_option(encoding)
                    .with_etag_option(Some(etag))
                    .with_last_modified_option(mtime)
                    .with_metadata_entry("not_modified", true));
            }
        }

        Ok(FetchResult::new(content)
            .with_content_type(content_type)
            .with_encoding_option(encoding)
            .with_etag_option(Some(etag))
            .with_last_modified_option(mtime)
            .with_metadata_entry("provider", self.name())
            .with_metadata_entry("path", file_path.to_string_lossy().to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        if self.ensure_not_closed().is_err() {
            return false;
        }

        match self.resolve(path) {
            Ok(file_path) => fs::metadata(&file_path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl LocalStorage {
    /// List files under a directory relative to the base path.
    ///
    /// `pattern` is matched against paths relative to the listed
    /// directory; with `recursive` the whole subtree is scanned.
    pub async fn list_files(
        &self,
        path: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<String>, StorageError> {
        self.ensure_not_closed()?;

        let dir_path = if path.is_empty() {
            self.base_path.clone()
        } else {
            self.resolve(path)?
        };

        if !dir_path.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut pending = vec![dir_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    if recursive {
                        pending.push(entry_path);
                    }
                    continue;
                }

                let Ok(relative) = entry_path.strip_prefix(&dir_path) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                let effective_pattern = if recursive && !pattern.contains("**") {
                    format!("**/{pattern}")
                } else {
                    pattern.to_string()
                };

                if match_pattern(&relative, &effective_pattern) {
                    let Ok(from_base) = entry_path.strip_prefix(&self.base_path) else {
                        continue;
                    };
                    files.push(from_base.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Quoted content etag, stable across processes.
fn content_etag(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("\"{}\"", hex::encode(digest))
}

/// Lexical path normalization: resolves `.` and `..` without touching the
/// filesystem, so traversal checks work for paths that do not exist yet.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn guess_content_type(path: &Path) -> (String, Option<String>) {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let (mime, text) = match extension.as_str() {
        "md" | "mdx" => ("text/markdown", true),
        "txt" => ("text/plain", true),
        "html" | "htm" => ("text/html", true),
        "css" => ("text/css", true),
        "csv" => ("text/csv", true),
        "js" => ("text/javascript", true),
        "json" => ("application/json", true),
        "yaml" | "yml" => ("application/yaml", true),
        "toml" => ("application/toml", true),
        "xml" => ("application/xml", true),
        "pdf" => ("application/pdf", false),
        "png" => ("image/png", false),
        "jpg" | "jpeg" => ("image/jpeg", false),
        "gif" => ("image/gif", false),
        "svg" => ("image/svg+xml", true),
        "webp" => ("image/webp", false),
        _ => ("application/octet-stream", false),
    };

    let encoding = text.then(|| "utf-8".to_string());
    (mime.to_string(), encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_with(files: &[(&str, &str)]) -> (tempfile::TempDir, LocalStorage) {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn fetches_file_content_and_metadata() {
        let (_dir, storage) = storage_with(&[("docs/api.md", "# API")]);

        let result = storage.fetch("docs/api.md", None).await.unwrap();
        assert_eq!(result.text().unwrap(), "# API");
        assert_eq!(result.content_type, "text/markdown");
        assert_eq!(result.encoding.as_deref(), Some("utf-8"));
        assert!(result.etag.is_some());
        assert!(result.last_modified.is_some());
        assert_eq!(
            result.metadata.get("provider").and_then(|v| v.as_str()),
            Some("local")
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, storage) = storage_with(&[]);
        assert!(matches!(
            storage.fetch("nope.md", None).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(!storage.exists("nope.md").await);
    }

    #[tokio::test]
    async fn directory_is_not_a_file() {
        let (_dir, storage) = storage_with(&[("docs/api.md", "x")]);
        assert!(matches!(
            storage.fetch("docs", None).await,
            Err(StorageError::NotAFile { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, storage) = storage_with(&[("a.md", "x")]);
        assert!(matches!(
            storage.fetch("../../etc/passwd", None).await,
            Err(StorageError::PathTraversal { .. })
        ));
        assert!(!storage.exists("../outside.md").await);
    }

    #[tokio::test]
    async fn conditional_fetch_by_etag() {
        let (_dir, storage) = storage_with(&[("a.md", "hello")]);

        let first = storage.fetch("a.md", None).await.unwrap();
        let etag = first.etag.clone().unwrap();

        let options = FetchOptions::new().with_if_none_match(etag);
        let second = storage.fetch("a.md", Some(&options)).await.unwrap();
        assert!(second.not_modified());
        assert!(second.content.is_empty());
    }

    #[tokio::test]
    async fn conditional_fetch_by_mtime() {
        let (_dir, storage) = storage_with(&[("a.md", "hello")]);

        let future = Utc::now() + chrono::Duration::hours(1);
        let options = FetchOptions::new().with_if_modified_since(future);
        let result = storage.fetch("a.md", Some(&options)).await.unwrap();
        assert!(result.not_modified());
    }

    #[tokio::test]
    async fn exists_and_list_files() {
        let (_dir, storage) = storage_with(&[
            ("docs/a.md", "a"),
            ("docs/deep/b.md", "b"),
            ("docs/deep/c.txt", "c"),
        ]);

        assert!(storage.exists("docs/a.md").await);

        let flat = storage.list_files("docs", "*.md", false).await.unwrap();
        assert_eq!(flat, vec!["docs/a.md"]);

        let recursive = storage.list_files("docs", "*.md", true).await.unwrap();
        assert_eq!(recursive, vec!["docs/a.md", "docs/deep/b.md"]);
    }

    #[tokio::test]
    async fn closed_provider_refuses_fetch() {
        let (_dir, storage) = storage_with(&[("a.md", "x")]);
        storage.close().await;
        assert!(matches!(
            storage.fetch("a.md", None).await,
            Err(StorageError::ProviderClosed { .. })
        ));
    }
}
