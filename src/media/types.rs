use super::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// An inbound extraction request.
///
/// `original` is what the caller sent; `cleaned` has tracking parameters
/// removed and is what backends and the cache key see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub original: String,
    pub cleaned: String,
}

impl MediaRequest {
    pub fn parse(raw: &str, tracking_params: &[String]) -> Result<Self, ExtractError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ExtractError::RequestShape("URL is required".to_string()));
        }

        let lower = trimmed.to_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(ExtractError::RequestShape(format!(
                "Invalid URL format: {trimmed}"
            )));
        }

        let mut parsed = Url::parse(trimmed)
            .map_err(|e| ExtractError::RequestShape(format!("Invalid URL {trimmed}: {e}")))?;

        if parsed.host_str().is_none() {
            return Err(ExtractError::RequestShape(format!(
                "URL has no host: {trimmed}"
            )));
        }

        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let kept: Vec<&(String, String)> = pairs
            .iter()
            .filter(|(key, _)| !is_tracking_param(key, tracking_params))
            .collect();

        if kept.len() != pairs.len() {
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                parsed
                    .query_pairs_mut()
                    .clear()
                    .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
        }

        Ok(Self {
            original: trimmed.to_string(),
            cleaned: parsed.to_string(),
        })
    }

    /// URL handed to backends.
    pub fn url(&self) -> &str {
        &self.cleaned
    }
}

/// `utm_*` style entries match by prefix, everything else exactly.
fn is_tracking_param(key: &str, tracking_params: &[String]) -> bool {
    tracking_params.iter().any(|param| match param.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == param,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Youtube,
    Instagram,
    Facebook,
    Twitter,
    Reddit,
    Unknown,
}

impl Platform {
    #[cfg(test)]
    pub const ALL: [Platform; 7] = [
        Platform::Tiktok,
        Platform::Youtube,
        Platform::Instagram,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Reddit,
        Platform::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiktok => "tiktok",
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Tiktok => "TikTok",
            Self::Youtube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Facebook => "Facebook",
            Self::Twitter => "Twitter",
            Self::Reddit => "Reddit",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific format descriptor, only alive during normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFormat {
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate_kbps: Option<f64>,
    pub file_size_bytes: Option<u64>,
    pub stream_url: String,
}

impl RawFormat {
    pub fn is_audio_only(&self) -> bool {
        self.video_codec.is_none() && self.audio_codec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityClass {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "sd")]
    Sd,
    #[serde(rename = "hd")]
    Hd,
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

/// One downloadable option as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatOption {
    pub label: String,
    #[serde(rename = "quality")]
    pub quality_class: QualityClass,
    #[serde(rename = "file_size")]
    pub file_size_human: Option<String>,
    pub url: String,
    #[serde(rename = "ext")]
    pub extension: String,
}

impl FormatOption {
    pub fn new(
        label: impl Into<String>,
        quality_class: QualityClass,
        url: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            quality_class,
            file_size_human: None,
            url: url.into(),
            extension: extension.into(),
        }
    }
}

/// Canonical extraction result, regardless of which backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub platform: String,
    pub duration: Option<String>,
    pub formats: Vec<FormatOption>,
}

impl MediaInfo {
    pub fn has_formats(&self) -> bool {
        !self.formats.is_empty()
    }
}
