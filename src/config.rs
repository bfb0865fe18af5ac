//! Cache configuration
//!
//! Set once when the cache is constructed and read-only afterwards.
//! Loaded from a JSON file and/or `IMGCACHE_*` environment variables.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Default number of simultaneous downloads
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Which platform directory the cache lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDirectoryType {
    /// Platform cache directory (may be purged by the OS)
    #[default]
    Cache,
    /// Platform data directory (persistent)
    Data,
}

/// How `ImageCache::get_image_src` renders a cached image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageReturnType {
    /// Local file path
    #[default]
    Uri,
    /// `data:` URL with the image inlined as base64
    Base64,
}

/// Image cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Maximum total cache size in bytes (0 disables the quota)
    pub max_cache_size: u64,

    /// Maximum age of a cached file in seconds (0 disables age pruning)
    pub max_cache_age: u64,

    /// Maximum number of simultaneous downloads
    pub concurrency: usize,

    /// Log cache failures at warn level instead of debug
    pub debug_mode: bool,

    /// Sub-directory of the storage root holding cached images
    pub cache_directory_name: String,

    pub cache_directory_type: CacheDirectoryType,

    /// Keep the URL's extension on cached file names
    pub file_name_cached_with_extension: bool,

    /// Extension used when the URL has none (including the leading dot)
    pub fallback_file_name_cached_extension: String,

    pub image_return_type: ImageReturnType,

    /// Extra headers sent with every image request
    pub http_headers: BTreeMap<String, String>,

    pub request_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 0,
            max_cache_age: 0,
            concurrency: DEFAULT_CONCURRENCY,
            debug_mode: false,
            cache_directory_name: "image-loader-cache".to_string(),
            cache_directory_type: CacheDirectoryType::Cache,
            file_name_cached_with_extension: true,
            fallback_file_name_cached_extension: ".jpg".to_string(),
            image_return_type: ImageReturnType::Uri,
            http_headers: BTreeMap::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing keys take their default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| CacheError::Config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `IMGCACHE_*` environment variables
    ///
    /// Recognised: `IMGCACHE_MAX_SIZE`, `IMGCACHE_MAX_AGE`,
    /// `IMGCACHE_CONCURRENCY`, `IMGCACHE_DEBUG`, `IMGCACHE_DIR_NAME`.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(size) = env_parse::<u64>("IMGCACHE_MAX_SIZE")? {
            self.max_cache_size = size;
        }
        if let Some(age) = env_parse::<u64>("IMGCACHE_MAX_AGE")? {
            self.max_cache_age = age;
        }
        if let Some(concurrency) = env_parse::<usize>("IMGCACHE_CONCURRENCY")? {
            self.concurrency = concurrency;
        }
        if let Ok(debug) = env::var("IMGCACHE_DEBUG") {
            self.debug_mode = matches!(debug.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(name) = env::var("IMGCACHE_DIR_NAME") {
            self.cache_directory_name = name;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CacheError::Config("concurrency must be at least 1".to_string()));
        }
        if !self.fallback_file_name_cached_extension.starts_with('.') {
            return Err(CacheError::Config(format!(
                "fallback extension {:?} must start with '.'",
                self.fallback_file_name_cached_extension
            )));
        }
        if self.cache_directory_name.is_empty()
            || self.cache_directory_name.contains(['/', '\\'])
            || self.cache_directory_name == ".."
        {
            return Err(CacheError::Config(format!(
                "cache directory name {:?} must be a single path component",
                self.cache_directory_name
            )));
        }
        Ok(())
    }

    /// Quota in bytes, `None` when disabled
    pub fn quota(&self) -> Option<u64> {
        (self.max_cache_size > 0).then_some(self.max_cache_size)
    }

    /// Maximum file age, `None` when disabled
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_cache_age > 0).then(|| Duration::from_secs(self.max_cache_age))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.quota(), None);
        assert_eq!(config.max_age(), None);
        assert_eq!(config.fallback_file_name_cached_extension, ".jpg");
        assert!(config.file_name_cached_with_extension);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = CacheConfig::from_json(
            r#"{
                "maxCacheSize": 1000,
                "maxCacheAge": 3600,
                "concurrency": 2,
                "imageReturnType": "base64",
                "httpHeaders": { "User-Agent": "imgcache-test" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.quota(), Some(1000));
        assert_eq!(config.max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.image_return_type, ImageReturnType::Base64);
        assert_eq!(config.http_headers.get("User-Agent").unwrap(), "imgcache-test");
        // Untouched keys keep their defaults
        assert_eq!(config.cache_directory_name, "image-loader-cache");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let result = CacheConfig::from_json(r#"{ "concurrency": 0 }"#);
        assert!(matches!(result, Err(CacheError::Config(_))));

        let result = CacheConfig::from_json(r#"{ "fallbackFileNameCachedExtension": "png" }"#);
        assert!(matches!(result, Err(CacheError::Config(_))));

        let result = CacheConfig::from_json(r#"{ "cacheDirectoryName": "../escape" }"#);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgcache.json");
        std::fs::write(&path, r#"{ "debugMode": true }"#).unwrap();

        let config = CacheConfig::from_file(&path).unwrap();
        assert!(config.debug_mode);

        let missing = CacheConfig::from_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(CacheError::Config(_))));
    }
}
