//! # HTTP Storage
//!
//! Storage provider fetching content over HTTP/HTTPS with reqwest. The
//! client is created lazily on first use and dropped again on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};

use crate::error::StorageError;

use super::provider::{DEFAULT_CONTENT_TYPE, FetchOptions, FetchResult, StorageProvider};

const EXISTS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpStorage {
    base_url: Option<String>,
    default_headers: HashMap<String, String>,
    timeout: Duration,
    max_redirects: usize,
    // Index 0: redirects disabled, index 1: redirects enabled
    clients: Mutex<[Option<Client>; 2]>,
    closed: AtomicBool,
}

impl HttpStorage {
    /// Create an HTTP provider. Without a base URL only absolute
    /// `http(s)://` paths can be fetched.
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            default_headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            clients: Mutex::new([None, None]),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
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

    /// Get or lazily create the client for the requested redirect policy.
    fn client(&self, follow_redirects: bool) -> Result<Client, StorageError> {
        let index = usize::from(follow_redirects);
        let mut clients = self.clients.lock();

        if let Some(client) = &clients[index] {
            return Ok(client.clone());
        }

        let redirect = if follow_redirects {
            reqwest::redirect::Policy::limited(self.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .default_headers(header_map(&self.default_headers))
            .redirect(redirect)
            .build()?;

        clients[index] = Some(client.clone());
        Ok(client)
    }

    fn build_url(&self, path: &str) -> Result<String, StorageError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }

        match &self.base_url {
            Some(base) => Ok(format!("{base}/{}", path.trim_start_matches('/'))),
            None => Err(StorageError::NoBaseUrl {
                path: path.to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        url: &str,
        options: Option<&FetchOptions>,
    ) -> Result<Response, StorageError> {
        let follow_redirects = options.map(|o| o.follow_redirects).unwrap_or(true);
        let timeout = options.map(|o| o.timeout).unwrap_or(self.timeout);
        let client = self.client(follow_redirects)?;

        let mut request = client.get(url).timeout(timeout);

        if let Some(options) = options {
            for (name, value) in &options.headers {
                request = request.header(name, value);
            }
            if let Some(etag) = &options.if_none_match {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(since) = options.if_modified_since {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, http_date(since));
            }
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::Timeout {
                    url: url.to_string(),
                    timeout,
                }
            } else {
                StorageError::RequestFailed(e)
            }
        })
    }
}

#[async_trait]
impl StorageProvider for HttpStorage {
    async fn fetch(
        &self,
        path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<FetchResult, StorageError> {
        self.ensure_not_closed()?;

        let url = self.build_url(path)?;
        let response = self.execute(&url, options).await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            let (etag, last_modified, content_type) = response_cache_headers(&response);
            return Ok(FetchResult::new(bytes::Bytes::new())
                .with_content_type(content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()))
                .with_encoding_option(None)
                .with_etag_option(etag)
                .with_last_modified_option(last_modified)
                .with_metadata_entry("not_modified", true)
                .with_metadata_entry("status", 304));
        }

        map_status(status, &url, &response)?;

        let (etag, last_modified, content_type_header) = response_cache_headers(&response);
        let (content_type, encoding) = split_content_type(content_type_header.as_deref());
        let final_url = response.url().to_string();

        let content = response
            .bytes()
            .await
            .map_err(StorageError::RequestFailed)?;

        Ok(FetchResult::new(content)
            .with_content_type(content_type)
            .with_encoding_option(encoding)
            .with_etag_option(etag)
            .with_last_modified_option(last_modified)
            .with_metadata_entry("provider", self.name())
            .with_metadata_entry("url", final_url)
            .with_metadata_entry("status", status.as_u16()))
    }

    async fn exists(&self, path: &str) -> bool {
        if self.ensure_not_closed().is_err() {
            return false;
        }

        let Ok(url) = self.build_url(path) else {
            return false;
        };
        let Ok(client) = self.client(true) else {
            return false;
        };

        match client.head(&url).timeout(EXISTS_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        *self.clients.lock() = [None, None];
        self.closed.store(true, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Map an error status to the storage error taxonomy.
fn map_status(status: StatusCode, url: &str, response: &Response) -> Result<(), StorageError> {
    match status {
        StatusCode::NOT_FOUND => Err(StorageError::NotFound {
            path: url.to_string(),
        }),
        StatusCode::FORBIDDEN => Err(StorageError::AccessDenied {
            path: url.to_string(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(StorageError::RateLimited {
            url: url.to_string(),
            retry_after: header_string(response, reqwest::header::RETRY_AFTER.as_str()),
        }),
        s if s.is_client_error() || s.is_server_error() => Err(StorageError::Http {
            url: url.to_string(),
            status: s,
        }),
        _ => Ok(()),
    }
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract the cache-relevant headers from a response.
fn response_cache_headers(
    response: &Response,
) -> (Option<String>, Option<DateTime<Utc>>, Option<String>) {
    let etag = header_string(response, "etag");
    let last_modified = header_string(response, "last-modified")
        .as_deref()
        .and_then(parse_http_date);
    let content_type = header_string(response, "content-type");
    (etag, last_modified, content_type)
}

/// Split a Content-Type header into MIME type and charset.
fn split_content_type(header: Option<&str>) -> (String, Option<String>) {
    let Some(header) = header else {
        return (DEFAULT_CONTENT_TYPE.to_string(), None);
    };

    let mut parts = header.split(';');
    let mime = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let charset = parts
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .map(|value| value.trim_matches('"').to_ascii_lowercase())
        .next();

    (mime, charset)
}

/// RFC 1123 formatting for HTTP date headers.
fn http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn absolute_urls_pass_through() {
        let storage = HttpStorage::new(None);
        assert_eq!(
            storage.build_url("https://example.com/a.md").unwrap(),
            "https://example.com/a.md"
        );
    }

    #[test]
    fn relative_paths_join_base_url() {
        let storage = HttpStorage::new(Some("https://example.com/base/".to_string()));
        assert_eq!(
            storage.build_url("/docs/a.md").unwrap(),
            "https://example.com/base/docs/a.md"
        );
    }

    #[test]
    fn relative_path_without_base_is_an_error() {
        let storage = HttpStorage::new(None);
        assert!(matches!(
            storage.build_url("docs/a.md"),
            Err(StorageError::NoBaseUrl { .. })
        ));
    }

    #[test]
    fn http_date_round_trip() {
        let when = Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap();
        let formatted = http_date(when);
        assert_eq!(formatted, "Tue, 15 Nov 1994 08:12:31 GMT");
        assert_eq!(parse_http_date(&formatted), Some(when));
    }

    #[test]
    fn content_type_splits_charset() {
        let (mime, charset) = split_content_type(Some("text/markdown; charset=UTF-8"));
        assert_eq!(mime, "text/markdown");
        assert_eq!(charset.as_deref(), Some("utf-8"));

        let (mime, charset) = split_content_type(None);
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);
        assert!(charset.is_none());
    }
}
