use super::{
    error::{most_specific, ExtractError},
    extractor::{BackendKind, Extractor},
    normalize::DEFAULT_MIN_HEIGHT,
    types::{FormatOption, MediaInfo, MediaRequest, QualityClass},
    utils::format_duration,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const NAME: &str = "Invidious";
const VIDEO_ID_PATTERN: &str =
    r"(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|embed/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})";

/// Community mirror backend for YouTube. Every mirror speaks the same API,
/// so they are tried one after another.
pub struct InvidiousExtractor {
    client: reqwest::Client,
    instances: Vec<String>,
    max_video_formats: usize,
    min_height: u32,
    video_id: Regex,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousVideo {
    title: Option<String>,
    length_seconds: Option<u64>,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    adaptive_formats: Vec<StreamEntry>,
    #[serde(default)]
    format_streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
    url: String,
    #[serde(rename = "type")]
    mime_type: String,
    quality: Option<String>,
    quality_label: Option<String>,
    container: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvidiousFailure {
    error: String,
}

impl StreamEntry {
    fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio")
    }

    fn is_video(&self) -> bool {
        self.mime_type.starts_with("video")
    }

    fn label(&self) -> Option<&str> {
        self.quality_label.as_deref().or(self.quality.as_deref())
    }

    fn extension(&self, default: &str) -> String {
        match self.container.as_deref() {
            Some(container) if !container.is_empty() => container.to_string(),
            _ if self.mime_type.starts_with("audio/mp4") => "m4a".to_string(),
            _ if self.mime_type.contains("webm") => "webm".to_string(),
            _ => default.to_string(),
        }
    }
}

/// `"1080p60"` → 1080. Labels without a leading number (e.g. "medium")
/// have no height.
fn label_height(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn label_quality(label: &str) -> QualityClass {
    if label.contains("1080") || label.contains("720") {
        QualityClass::Hd
    } else {
        QualityClass::Sd
    }
}

impl InvidiousExtractor {
    pub fn new(client: reqwest::Client, instances: Vec<String>) -> Result<Self> {
        Ok(Self {
            client,
            instances,
            max_video_formats: 5,
            min_height: DEFAULT_MIN_HEIGHT,
            video_id: Regex::new(VIDEO_ID_PATTERN).context("Invalid video id pattern")?,
        })
    }

    pub fn with_max_video_formats(mut self, max: usize) -> Self {
        self.max_video_formats = max;
        self
    }

    pub fn with_min_height(mut self, min_height: u32) -> Self {
        self.min_height = min_height;
        self
    }

    pub fn extract_video_id(&self, url: &str) -> Result<String, ExtractError> {
        self.video_id
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| {
                ExtractError::RequestShape(format!("Could not extract video id from {url}"))
            })
    }

    async fn fetch_video(&self, instance: &str, video_id: &str) -> Result<InvidiousVideo, ExtractError> {
        let url = format!("{}/api/v1/videos/{}", instance.trim_end_matches('/'), video_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExtractError::transport(NAME, e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::transport(NAME, e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<InvidiousFailure>(&body) {
                Ok(failure) => ExtractError::rejected(NAME, failure.error),
                Err(_) => ExtractError::transport(NAME, format!("HTTP {status}")),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ExtractError::no_data(NAME, format!("Failed to parse video info: {e}"))
        })
    }

    fn to_media_info(&self, video: InvidiousVideo, instance: &str) -> Result<MediaInfo, ExtractError> {
        let mut formats = Vec::new();

        if let Some(audio) = video.adaptive_formats.iter().find(|f| f.is_audio()) {
            formats.push(FormatOption::new(
                "Audio (Best)",
                QualityClass::Audio,
                audio.url.clone(),
                audio.extension("m4a"),
            ));
        }

        let mut seen = HashSet::new();
        let mut videos: Vec<(Option<u32>, FormatOption)> = video
            .format_streams
            .iter()
            .chain(video.adaptive_formats.iter())
            .filter(|f| f.is_video())
            .filter_map(|f| {
                let label = f.label()?.to_string();
                let height = label_height(&label);
                if height.is_some_and(|h| h < self.min_height) || !seen.insert(label.clone()) {
                    return None;
                }
                let quality = label_quality(&label);
                Some((height, FormatOption::new(label, quality, f.url.clone(), f.extension("mp4"))))
            })
            .collect();

        // stable: entries without a height keep their order after the rest
        videos.sort_by(|a, b| b.0.cmp(&a.0));
        formats.extend(
            videos
                .into_iter()
                .take(self.max_video_formats)
                .map(|(_, option)| option),
        );

        if formats.is_empty() {
            return Err(ExtractError::no_data(NAME, "no audio or video streams"));
        }

        let thumbnail = video
            .video_thumbnails
            .iter()
            .find(|t| t.width.is_some_and(|w| w >= 320))
            .or_else(|| video.video_thumbnails.first())
            .map(|t| {
                if t.url.starts_with('/') {
                    format!("{}{}", instance.trim_end_matches('/'), t.url)
                } else {
                    t.url.clone()
                }
            });

        Ok(MediaInfo {
            title: video.title,
            thumbnail,
            platform: NAME.to_string(),
            duration: video.length_seconds.map(|s| format_duration(s as f64)),
            formats,
        })
    }
}

#[async_trait]
impl Extractor for InvidiousExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Invidious
    }

    async fn extract(&self, request: &MediaRequest) -> Result<MediaInfo, ExtractError> {
        let video_id = self.extract_video_id(request.url())?;
        debug!("Resolved video id {} for {}", video_id, request.url());

        let mut last_error = None;

        for instance in &self.instances {
            info!("Trying Invidious instance {}", instance);
            let result = match self.fetch_video(instance, &video_id).await {
                Ok(video) => self.to_media_info(video, instance),
                Err(e) => Err(e),
            };

            match result {
                Ok(media_info) => {
                    info!("Invidious instance {} returned media", instance);
                    return Ok(media_info);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Invidious instance {} failed: {}", instance, e);
                    last_error = Some(most_specific(last_error, e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::no_data(NAME, "no instances configured")))
    }

    async fn is_available(&self) -> bool {
        for instance in &self.instances {
            let url = format!("{}/api/v1/stats", instance.trim_end_matches('/'));
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => warn!("❌ Invidious instance {} answered {}", instance, response.status()),
                Err(e) => warn!("❌ Invidious instance {} unreachable: {}", instance, e),
            }
        }
        false
    }
}
