//! URL validation for download submissions
//!
//! The queue itself accepts any URL; callers run these checks before `add`
//! so malformed input never reaches the worker.

use crate::utils::error::YtQueueError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Patterns covering the YouTube URL shapes we accept
static YOUTUBE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([a-zA-Z0-9_-]{11})",
        r"(?:https?://)?(?:www\.)?youtube\.com/playlist\?list=([a-zA-Z0-9_-]+)",
        r"(?:https?://)?(?:www\.)?youtube\.com/channel/([a-zA-Z0-9_-]+)",
        r"(?:https?://)?(?:www\.)?youtube\.com/user/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

const YOUTUBE_DOMAINS: [&str; 4] = [
    "youtube.com",
    "youtu.be",
    "www.youtube.com",
    "m.youtube.com",
];

/// Check that a string parses as an http(s) URL with a host
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Check that a URL belongs to YouTube and matches a supported shape
pub fn is_youtube_url(url: &str) -> bool {
    let url_lower = url.trim().to_lowercase();

    if !YOUTUBE_DOMAINS
        .iter()
        .any(|domain| url_lower.contains(domain))
    {
        return false;
    }

    YOUTUBE_PATTERNS.iter().any(|p| p.is_match(&url_lower))
}

/// Validate a URL for download, with a user-facing message on rejection
pub fn validate_download_url(url: &str) -> Result<(), YtQueueError> {
    let url = url.trim();

    if url.is_empty() {
        return Err(YtQueueError::InvalidUrl("Please enter a URL.".to_string()));
    }

    if !is_valid_url(url) {
        return Err(YtQueueError::InvalidUrl(
            "Not a valid URL. Expected something like \
             https://www.youtube.com/watch?v=VIDEO_ID or https://youtu.be/VIDEO_ID"
                .to_string(),
        ));
    }

    // yt-dlp handles many sites, but we only accept YouTube here
    if !is_youtube_url(url) {
        return Err(YtQueueError::InvalidUrl(
            "Only YouTube URLs are supported.".to_string(),
        ));
    }

    Ok(())
}
