//! Network collaborator for downloading image bytes

pub mod errors;
pub mod http;

use async_trait::async_trait;

pub use errors::FetchError;
pub use http::HttpTransport;

/// Fetches the raw bytes behind an image URL
///
/// Implementations own their timeout and retry behavior and report the
/// final failure; the cache treats any error as "serve from network".
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}
