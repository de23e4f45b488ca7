use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
}

impl Platform {
    /// Short tag used as filename prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Platform::YouTube => "yt",
            Platform::TikTok => "tt",
            Platform::Instagram => "ig",
        }
    }

    /// Origin sent as `Referer` when pulling CDN assets directly.
    pub fn referer(&self) -> &'static str {
        match self {
            Platform::YouTube => "https://www.youtube.com/",
            Platform::TikTok => "https://www.tiktok.com/",
            Platform::Instagram => "https://www.instagram.com/",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Short,
    #[default]
    Long,
    Reel,
    Post,
}

impl fmt::Display for VideoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoKind::Short => "Short",
            VideoKind::Long => "Long",
            VideoKind::Reel => "Reel",
            VideoKind::Post => "Post",
        };
        f.write_str(name)
    }
}

/// One catalog item as handed over by the selection layer. Read-only for the
/// queue; every field the queue needs is copied out of it at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub kind: VideoKind,
}

impl SourceRef {
    pub fn new(id: &str, platform: Platform, title: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            platform,
            title: title.to_string(),
            url: url.to_string(),
            media_url: None,
            views: 0,
            likes: 0,
            comments: 0,
            duration_seconds: 0,
            kind: VideoKind::default(),
        }
    }

    pub fn youtube(id: &str, title: &str) -> Self {
        Self::new(
            id,
            Platform::YouTube,
            title,
            &format!("https://www.youtube.com/watch?v={}", id),
        )
    }
}
