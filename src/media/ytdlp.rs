use super::{
    error::ExtractError,
    extractor::{BackendKind, Extractor},
    http::pick_user_agent,
    normalize::FormatNormalizer,
    types::{MediaInfo, MediaRequest, RawFormat},
    utils::{error_line, format_duration},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

const NAME: &str = "yt-dlp";

/// General-purpose extractor. Runs `yt-dlp --dump-json` and feeds the raw
/// format list through the normalizer.
pub struct YtDlpExtractor {
    binary: String,
    cookies_file: Option<PathBuf>,
    timeout: Duration,
    user_agents: Vec<String>,
    counter: AtomicUsize,
    normalizer: FormatNormalizer,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    duration_string: Option<String>,
    extractor_key: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    // single-format extractors put the stream fields at the top level
    #[serde(flatten)]
    top_level: YtDlpFormat,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    ext: Option<String>,
    height: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    tbr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

fn codec(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|c| !c.is_empty() && *c != "none")
        .map(str::to_string)
}

impl YtDlpFormat {
    fn to_raw(&self) -> Option<RawFormat> {
        let url = self.url.clone()?;

        if self.ext.as_deref() == Some("mhtml") {
            return None;
        }

        let video_codec = codec(&self.vcodec);
        // explicit "none" means not a video stream, whatever the height says
        let height = if self.vcodec.as_deref() == Some("none") {
            None
        } else {
            self.height.filter(|h| *h > 0.0).map(|h| h as u32)
        };

        Some(RawFormat {
            height,
            video_codec,
            audio_codec: codec(&self.acodec),
            bitrate_kbps: self.tbr.filter(|b| *b > 0.0),
            file_size_bytes: self
                .filesize
                .or(self.filesize_approx)
                .filter(|s| *s > 0.0)
                .map(|s| s as u64),
            stream_url: url,
        })
    }
}

impl YtDlpInfo {
    fn raw_formats(&self) -> Vec<RawFormat> {
        if self.formats.is_empty() {
            return self.top_level.to_raw().into_iter().collect();
        }
        self.formats.iter().filter_map(YtDlpFormat::to_raw).collect()
    }
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies_file: None,
            timeout,
            user_agents: Vec::new(),
            counter: AtomicUsize::new(0),
            normalizer: FormatNormalizer::default(),
        }
    }

    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    pub fn with_normalizer(mut self, normalizer: FormatNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    async fn dump_json(&self, url: &str) -> Result<String, ExtractError> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let mut command = Command::new(&self.binary);
        command
            .arg("--dump-json")
            .arg("--no-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--force-ipv4");

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        if let Some(agent) = pick_user_agent(&self.user_agents, counter) {
            command.arg("--user-agent").arg(agent);
        }

        match &self.cookies_file {
            Some(path) if path.exists() => {
                debug!("Using cookies from {}", path.display());
                command.arg("--cookies").arg(path);
            }
            Some(path) => warn!("Cookies file {} not found, continuing without", path.display()),
            None => {}
        }

        command.arg(url).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ExtractError::transport(
                    NAME,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| ExtractError::transport(NAME, format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = error_line(&stderr)
                .unwrap_or_else(|| format!("exited with {}", output.status));
            return Err(ExtractError::rejected(NAME, message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn media_info_from_json(&self, json: &str) -> Result<MediaInfo, ExtractError> {
        if json.trim().is_empty() {
            return Err(ExtractError::no_data(NAME, "empty output"));
        }

        let info: YtDlpInfo = serde_json::from_str(json)
            .map_err(|e| ExtractError::no_data(NAME, format!("Failed to parse media metadata: {e}")))?;

        let raw = info.raw_formats();
        debug!("yt-dlp returned {} usable raw formats", raw.len());

        let formats = self.normalizer.normalize(&raw, info.duration);
        if formats.is_empty() {
            return Err(ExtractError::no_data(NAME, "no downloadable formats"));
        }

        Ok(MediaInfo {
            title: info.title,
            thumbnail: info.thumbnail,
            platform: info.extractor_key.unwrap_or_else(|| NAME.to_string()),
            duration: info
                .duration_string
                .or_else(|| info.duration.map(format_duration)),
            formats,
        })
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ytdlp
    }

    async fn extract(&self, request: &MediaRequest) -> Result<MediaInfo, ExtractError> {
        let json = self.dump_json(request.url()).await?;
        let info = self.media_info_from_json(&json)?;
        info!(
            "yt-dlp extracted {} formats for {}",
            info.formats.len(),
            request.url()
        );
        Ok(info)
    }

    async fn is_available(&self) -> bool {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp is available, version: {}", version.trim());
                true
            }
            Ok(_) => {
                warn!("❌ yt-dlp command failed");
                false
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}
