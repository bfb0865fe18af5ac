//! HTTP image downloads
//!
//! Fetches image bytes with reqwest. Retryable failures (timeouts, 5xx,
//! rate limiting, connection errors) are retried with backoff before the
//! error is reported to the cache.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use super::{FetchError, Transport};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Delay before each retry
const BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// HTTP transport for image downloads
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP client carrying the timeout and default headers
    http_client: Client,
}

impl HttpTransport {
    /// Build a transport from the cache configuration
    ///
    /// Uses `request_timeout_secs` and sends `http_headers` with every request.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let headers = build_headers(config)?;

        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| CacheError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Single download attempt
    async fn fetch_once(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
            return tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
                _ => FetchError::Network(e.to_string()),
            });
        }

        let response = self.http_client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status, &body));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_image_content_type(content_type) {
                return Err(FetchError::NotAnImage(content_type.to_string()));
            }
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_bytes(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        debug!(url = url, "Downloading image");

        let mut attempt = 0;
        loop {
            match self.fetch_once(&parsed).await {
                Ok(bytes) => {
                    info!(url = url, size = bytes.len(), "Downloaded image");
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(2000);
                    warn!(
                        url = url,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying image download"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Header map for the configured extra headers
fn build_headers(config: &CacheConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.http_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CacheError::Config(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CacheError::Config(format!("invalid value for header {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Whether a Content-Type can carry image bytes
///
/// Generic binary types are accepted since many CDNs serve images that way.
fn is_image_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("image/") || mime == "application/octet-stream" || mime.is_empty()
}
