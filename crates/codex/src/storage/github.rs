//! # GitHub Storage
//!
//! Storage provider fetching repository content from GitHub, either via
//! raw.githubusercontent.com (public repos, no token) or the contents API
//! (private repos, richer metadata).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::StorageError;
use crate::reference::parse_reference;

use super::provider::{FetchOptions, FetchResult, StorageProvider};

const RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
const API_BASE_URL: &str = "https://api.github.com";
const EXISTS_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "fractary-codex-rust";

pub struct GitHubStorage {
    token: Option<String>,
    default_branch: String,
    use_raw_urls: bool,
    timeout: Duration,
    client: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl GitHubStorage {
    /// Create a GitHub provider. Without an explicit token the
    /// `GITHUB_TOKEN` environment variable is consulted.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.or_else(|| std::env::var("GITHUB_TOKEN").ok()),
            default_branch: "main".to_string(),
            use_raw_urls: true,
            timeout: Duration::from_secs(30),
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_use_raw_urls(mut self, use_raw_urls: bool) -> Self {
        self.use_raw_urls = use_raw_urls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn ensure_not_closed(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StorageError::ProviderClosed {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn client(&self) -> Result<Client, StorageError> {
        let mut slot = self.client.lock();
        if let Some(client) = &*slot {
            return Ok(client.clone());
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        if let Some(token) = &self.token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        *slot = Some(client.clone());
        Ok(client)
    }

    /// Split a path into (org, repo, branch, file path).
    ///
    /// Accepts `codex://org/project/path`, `org/repo/branch/path` when the
    /// third segment looks like a branch name, and `org/repo/path` with
    /// the default branch otherwise. For exact branch control use a
    /// codex:// URI.
    fn parse_path(&self, path: &str) -> Result<(String, String, String, String), StorageError> {
        if path.starts_with("codex://") {
            let parsed = parse_reference(path).map_err(|e| StorageError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            return Ok((
                parsed.org,
                parsed.project,
                self.default_branch.clone(),
                parsed.path,
            ));
        }

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 3 {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
                reason: "expected org/repo/path or org/repo/branch/path".to_string(),
            });
        }

        let org = parts[0].to_string();
        let repo = parts[1].to_string();

        let third_is_branch = parts.len() >= 4
            && (matches!(
                parts[2],
                "main" | "master" | "develop" | "dev" | "staging" | "production"
            ) || parts[2].starts_with('v')
                || parts[2].starts_with("release"));

        if third_is_branch {
            Ok((org, repo, parts[2].to_string(), parts[3..].join("/")))
        } else {
            Ok((org, repo, self.default_branch.clone(), parts[2..].join("/")))
        }
    }

    async fn fetch_raw(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        file_path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError> {
        let url = format!("{RAW_BASE_URL}/{org}/{repo}/{branch}/{file_path}");
        let timeout = options.map(|o| o.timeout).unwrap_or(self.timeout);
        let client = self.client()?;

        let response = client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e, &url, timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                path: format!("{org}/{repo}/{file_path}"),
            });
        }
        if !status.is_success() {
            return Err(StorageError::Http { url, status });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
            .unwrap_or_else(|| "text/plain".to_string());

        let content = response
            .bytes()
            .await
            .map_err(StorageError::RequestFailed)?;

        Ok(FetchResult::new(content)
            .with_content_type(content_type)
            .with_metadata_entry("provider", self.name())
            .with_metadata_entry("method", "raw")
            .with_metadata_entry("org", org)
            .with_metadata_entry("repo", repo)
            .with_metadata_entry("branch", branch)
            .with_metadata_entry("path", file_path))
    }

    async fn fetch_api(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        file_path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError> {
        let url = format!("{API_BASE_URL}/repos/{org}/{repo}/contents/{file_path}");
        let timeout = options.map(|o| o.timeout).unwrap_or(self.timeout);
        let client = self.client()?;

        let response = client
            .get(&url)
            .query(&[("ref", branch)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e, &url, timeout))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(StorageError::NotFound {
                    path: format!("{org}/{repo}/{file_path}"),
                });
            }
            StatusCode::UNAUTHORIZED => return Err(StorageError::AuthFailed),
            StatusCode::FORBIDDEN => {
                let exhausted = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    == Some("0");
                if exhausted {
                    let reset = response
                        .headers()
                        .get("x-ratelimit-reset")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    return Err(StorageError::RateLimited {
                        url,
                        retry_after: reset,
                    });
                }
                return Err(StorageError::AccessDenied {
                    path: format!("{org}/{repo}/{file_path}"),
                });
            }
            s if !s.is_success() => return Err(StorageError::Http { url, status: s }),
            _ => {}
        }

        let data: Value = response.json().await.map_err(StorageError::RequestFailed)?;

        if data.get("type").and_then(Value::as_str) != Some("file") {
            return Err(StorageError::NotAFile {
                path: file_path.to_string(),
            });
        }

        let encoded = data
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .replace(['\n', '\r'], "");
        let content = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| StorageError::InvalidPath {
                path: file_path.to_string(),
                reason: format!("undecodable API content: {e}"),
            })?;

        let sha = data.get("sha").and_then(Value::as_str).map(String::from);

        let mut result = FetchResult::new(content)
            .with_content_type("text/plain")
            .with_etag_option(sha.as_ref().map(|s| format!("\"{s}\"")))
            .with_metadata_entry("provider", self.name())
            .with_metadata_entry("method", "api")
            .with_metadata_entry("org", org)
            .with_metadata_entry("repo", repo)
            .with_metadata_entry("branch", branch)
            .with_metadata_entry("path", file_path);

        if let Some(sha) = sha {
            result = result.with_metadata_entry("sha", sha);
        }
        if let Some(html_url) = data.get("html_url").and_then(Value::as_str) {
            result = result.with_metadata_entry("html_url", html_url);
        }

        Ok(result)
    }

    fn map_transport(&self, error: reqwest::Error, url: &str, timeout: Duration) -> StorageError {
        if error.is_timeout() {
            StorageError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else {
            StorageError::RequestFailed(error)
        }
    }
}

#[async_trait]
impl StorageProvider for GitHubStorage {
    async fn fetch(
        &self,
        path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError> {
        self.ensure_not_closed()?;

        let (org, repo, branch, file_path) = self.parse_path(path)?;

        if self.use_raw_urls && self.token.is_none() {
            self.fetch_raw(&org, &repo, &branch, &file_path, options)
                .await
        } else {
            self.fetch_api(&org, &repo, &branch, &file_path, options)
                .await
        }
    }

    async fn exists(&self, path: &str) -> bool {
        if self.ensure_not_closed().is_err() {
            return false;
        }

        let Ok((org, repo, branch, file_path)) = self.parse_path(path) else {
            return false;
        };
        let Ok(client) = self.client() else {
            return false;
        };

        let request = if self.use_raw_urls && self.token.is_none() {
            client.head(format!("{RAW_BASE_URL}/{org}/{repo}/{branch}/{file_path}"))
        } else {
            client
                .head(format!(
                    "{API_BASE_URL}/repos/{org}/{repo}/contents/{file_path}"
                ))
                .query(&[("ref", branch.as_str())])
        };

        match request.timeout(EXISTS_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        *self.client.lock() = None;
        self.closed.store(true, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "github"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> GitHubStorage {
        GitHubStorage {
            token: None,
            default_branch: "main".to_string(),
            use_raw_urls: true,
            timeout: Duration::from_secs(30),
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    #[test]
    fn parses_codex_uri() {
        let (org, repo, branch, path) = storage()
            .parse_path("codex://fractary/codex/docs/api.md")
            .unwrap();
        assert_eq!(org, "fractary");
        assert_eq!(repo, "codex");
        assert_eq!(branch, "main");
        assert_eq!(path, "docs/api.md");
    }

    #[test]
    fn parses_explicit_branch() {
        let (org, repo, branch, path) = storage()
            .parse_path("org/repo/develop/docs/api.md")
            .unwrap();
        assert_eq!((org.as_str(), repo.as_str()), ("org", "repo"));
        assert_eq!(branch, "develop");
        assert_eq!(path, "docs/api.md");
    }

    #[test]
    fn falls_back_to_default_branch() {
        let (_, _, branch, path) = storage().parse_path("org/repo/docs/api.md").unwrap();
        assert_eq!(branch, "main");
        assert_eq!(path, "docs/api.md");
    }

    #[test]
    fn version_prefix_is_treated_as_branch() {
        let (_, _, branch, path) = storage().parse_path("org/repo/v2.1/docs/api.md").unwrap();
        assert_eq!(branch, "v2.1");
        assert_eq!(path, "docs/api.md");
    }

    #[test]
    fn short_paths_are_invalid() {
        assert!(matches!(
            storage().parse_path("org/repo"),
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[test]
    fn bad_codex_uri_is_invalid_path() {
        assert!(matches!(
            storage().parse_path("codex://org"),
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
