//! URL to cache file name mapping
//!
//! Every cached image is stored flat in the cache directory under a name
//! derived only from its URL: an 8 hex digit token taken from the SHA-1
//! digest of the full URL, followed by the URL's extension.
//!
//! The token is 32 bits wide. Two URLs colliding on it share a cache file,
//! so the second URL is served the first one's image. For a personal image
//! cache of a few thousand entries the odds are negligible and accepted.

use sha1::{Digest, Sha1};
use url::Url;

use crate::config::CacheConfig;

/// Longest extension (without the dot) kept from a URL
const MAX_EXTENSION_LEN: usize = 8;

/// Suffix of files being downloaded but not yet committed to the index
pub const STAGING_SUFFIX: &str = ".tmp";

/// 32-bit token identifying a URL
pub fn hash_url(url: &str) -> u32 {
    let digest = Sha1::digest(url.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Extract the extension (with leading dot) from the URL's path
///
/// Query strings and fragments are ignored. Falls back to `fallback` when
/// the last path segment has no usable extension.
pub fn extension_from_url(url: &str, fallback: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };

    let segment = path.rsplit('/').next().unwrap_or(&path);
    match segment.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = &segment[dot + 1..];
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
            {
                format!(".{}", ext.to_ascii_lowercase())
            } else {
                fallback.to_string()
            }
        }
        _ => fallback.to_string(),
    }
}

/// Cache file name for a URL
pub fn file_name_for(url: &str, config: &CacheConfig) -> String {
    let token = format!("{:08x}", hash_url(url));
    if config.file_name_cached_with_extension {
        token + &extension_from_url(url, &config.fallback_file_name_cached_extension)
    } else {
        token
    }
}

/// Whether the URL points at something that has to be downloaded
///
/// Relative paths, `data:` URIs and anything unparsable are served as-is.
pub fn is_remote_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https" | "file"))
        .unwrap_or(false)
}

/// Staging name for an in-progress download of `name`
pub fn staging_name(name: &str) -> String {
    format!("{}{}", name, STAGING_SUFFIX)
}

/// Whether a directory entry is leftover download state rather than an image
pub fn is_staging_file(name: &str) -> bool {
    name.ends_with(STAGING_SUFFIX) || name.starts_with(".tmp")
}

/// MIME type for a cached file, from its extension
pub fn mime_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default();
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_deterministic() {
        let config = CacheConfig::default();
        let url = "https://example.com/images/cat.png?size=large";

        assert_eq!(file_name_for(url, &config), file_name_for(url, &config));
        assert_eq!(hash_url(url), hash_url(url));
    }

    #[test]
    fn test_file_name_format() {
        let config = CacheConfig::default();
        let name = file_name_for("https://example.com/images/cat.png", &config);

        let (token, ext) = name.split_at(8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, ".png");
    }

    #[test]
    fn test_distinct_urls_get_distinct_names() {
        let config = CacheConfig::default();
        let urls = [
            "https://example.com/a.jpg",
            "https://example.com/b.jpg",
            "https://example.com/a.jpg?v=2",
            "https://example.com/a.jpg#thumb",
            "https://cdn.example.com/a.jpg",
            "http://example.com/a.jpg",
        ];

        let names: std::collections::HashSet<_> =
            urls.iter().map(|u| file_name_for(u, &config)).collect();
        assert_eq!(names.len(), urls.len());
    }

    #[test]
    fn test_no_collisions_across_many_paths() {
        // 2^32 token space: a collision among 1k paths would point at a broken hash
        let tokens: std::collections::HashSet<u32> = (0..1_000)
            .map(|i| hash_url(&format!("https://example.com/photos/{}.jpg", i)))
            .collect();
        assert_eq!(tokens.len(), 1_000);
    }

    #[test]
    fn test_extension_extraction() {
        assert_eq!(extension_from_url("https://x.com/a/b.PNG", ".jpg"), ".png");
        assert_eq!(extension_from_url("https://x.com/a/b.webp?w=100#top", ".jpg"), ".webp");
        assert_eq!(extension_from_url("https://x.com/a/b", ".jpg"), ".jpg");
        // Dots in the host are not extensions
        assert_eq!(extension_from_url("https://example.com", ".jpg"), ".jpg");
        assert_eq!(extension_from_url("https://example.com/", ".jpg"), ".jpg");
        // Dotfiles and junk extensions fall back
        assert_eq!(extension_from_url("https://x.com/.hidden", ".jpg"), ".jpg");
        assert_eq!(extension_from_url("https://x.com/a.b%20c", ".jpg"), ".jpg");
        assert_eq!(extension_from_url("https://x.com/a.verylongextension", ".jpg"), ".jpg");
        // Relative paths still work
        assert_eq!(extension_from_url("img/photo.gif?x=1", ".jpg"), ".gif");
    }

    #[test]
    fn test_file_name_without_extension() {
        let config = CacheConfig {
            file_name_cached_with_extension: false,
            ..CacheConfig::default()
        };
        let name = file_name_for("https://example.com/a.png", &config);
        assert_eq!(name.len(), 8);
    }

    #[test]
    fn test_is_remote_url() {
        assert!(is_remote_url("http://x/y.jpg"));
        assert!(is_remote_url("HTTPS://example.com/y.jpg"));
        assert!(is_remote_url("file:///var/img.png"));

        assert!(!is_remote_url("/local/relative.png"));
        assert!(!is_remote_url("assets/img.png"));
        assert!(!is_remote_url("data:image/png;base64,AAAA"));
        assert!(!is_remote_url(""));
    }

    #[test]
    fn test_staging_names() {
        let staged = staging_name("0badcafe.jpg");
        assert!(is_staging_file(&staged));
        assert!(is_staging_file(".tmpA1b2C3"));
        assert!(!is_staging_file("0badcafe.jpg"));
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("0badcafe.png"), "image/png");
        assert_eq!(mime_type_for("0badcafe.jpg"), "image/jpeg");
        assert_eq!(mime_type_for("0badcafe"), "image/jpeg");
    }
}
