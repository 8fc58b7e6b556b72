//! Supported crawl platforms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported platform '{0}'")]
pub struct UnknownPlatform(pub String);

/// A platform the crawler knows how to collect from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Xhs,
    Douyin,
    Kuaishou,
    Bilibili,
    Weibo,
    Tieba,
    Zhihu,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Xhs,
        Platform::Douyin,
        Platform::Kuaishou,
        Platform::Bilibili,
        Platform::Weibo,
        Platform::Tieba,
        Platform::Zhihu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xhs => "xhs",
            Platform::Douyin => "douyin",
            Platform::Kuaishou => "kuaishou",
            Platform::Bilibili => "bilibili",
            Platform::Weibo => "weibo",
            Platform::Tieba => "tieba",
            Platform::Zhihu => "zhihu",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Xhs => "Xiaohongshu",
            Platform::Douyin => "Douyin",
            Platform::Kuaishou => "Kuaishou",
            Platform::Bilibili => "Bilibili",
            Platform::Weibo => "Weibo",
            Platform::Tieba => "Baidu Tieba",
            Platform::Zhihu => "Zhihu",
        }
    }

    /// Crawl types every platform supports.
    pub fn features(&self) -> &'static [&'static str] {
        &["search", "detail", "comment"]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let err = "myspace".parse::<Platform>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported platform 'myspace'");
    }

    #[test]
    fn test_platform_is_case_sensitive() {
        assert!("XHS".parse::<Platform>().is_err());
    }
}
