use super::{
    error::{most_specific, ExtractError},
    extractor::{BackendKind, Extractor},
    http::pick_user_agent,
    types::{FormatOption, MediaInfo, MediaRequest, QualityClass},
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use url::Url;

const NAME: &str = "Cobalt";

/// Tunnel-style backend: a hosted service that answers with direct media
/// links. Instances are tried in order until one returns something usable.
pub struct CobaltExtractor {
    client: reqwest::Client,
    instances: Vec<String>,
    api_key: Option<String>,
    public_base_url: String,
    user_agents: Vec<String>,
    counter: AtomicUsize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    video_quality: &'static str,
    audio_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_bitrate: Option<&'static str>,
    filename_style: &'static str,
    download_mode: &'static str,
}

impl<'a> CobaltRequest<'a> {
    fn video(url: &'a str) -> Self {
        Self {
            url,
            video_quality: "max",
            audio_format: "mp3",
            audio_bitrate: None,
            filename_style: "basic",
            download_mode: "auto",
        }
    }

    fn audio(url: &'a str) -> Self {
        Self {
            audio_bitrate: Some("320"),
            download_mode: "audio",
            ..Self::video(url)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum CobaltResponse {
    Success(CobaltMedia),
    Stream(CobaltMedia),
    Tunnel(CobaltMedia),
    Redirect(CobaltMedia),
    Error(CobaltFailure),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct CobaltMedia {
    url: Option<String>,
    audio: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    picker: Vec<PickerItem>,
}

#[derive(Debug, Deserialize)]
struct PickerItem {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CobaltFailure {
    error: Option<CobaltErrorBody>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CobaltErrorBody {
    code: String,
}

impl CobaltFailure {
    fn message(self) -> String {
        self.error
            .map(|e| e.code)
            .or(self.text)
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

impl CobaltExtractor {
    pub fn new(client: reqwest::Client, instances: Vec<String>) -> Self {
        Self {
            client,
            instances,
            api_key: None,
            public_base_url: "http://localhost:8000".to_string(),
            user_agents: Vec::new(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = base_url.into();
        self
    }

    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    /// Asks for an audio-only rendition and returns its direct URL. Backs
    /// the synthesized "Audio Only" option.
    pub async fn resolve_audio(&self, url: &str) -> Result<String, ExtractError> {
        let payload = CobaltRequest::audio(url);
        let mut last_error = None;

        for instance in &self.instances {
            match self.try_instance(instance, &payload).await {
                Ok(media) => {
                    if let Some(link) = media.url.or(media.audio) {
                        return Ok(link);
                    }
                    last_error = Some(most_specific(
                        last_error,
                        ExtractError::no_data(NAME, "No download URL"),
                    ));
                }
                Err(e) => {
                    warn!("Cobalt audio request to {} failed: {}", instance, e);
                    last_error = Some(most_specific(last_error, e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::no_data(NAME, "no instances configured")))
    }

    async fn try_instance(
        &self,
        instance: &str,
        payload: &CobaltRequest<'_>,
    ) -> Result<CobaltMedia, ExtractError> {
        let mut request = self
            .client
            .post(instance)
            .header(ACCEPT, "application/json")
            .json(payload);

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        if let Some(agent) = pick_user_agent(&self.user_agents, counter) {
            request = request.header(USER_AGENT, agent);
        }
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Api-Key {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractError::transport(NAME, e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::transport(NAME, e.to_string()))?;

        debug!("Cobalt response from {} ({}): {}", instance, status, body);

        let parsed = serde_json::from_str::<CobaltResponse>(&body);

        if !status.is_success() {
            return Err(match parsed {
                Ok(CobaltResponse::Error(failure)) => {
                    ExtractError::rejected(NAME, failure.message())
                }
                _ => ExtractError::transport(NAME, format!("HTTP {status}")),
            });
        }

        let media = match parsed
            .map_err(|e| ExtractError::no_data(NAME, format!("malformed response: {e}")))?
        {
            CobaltResponse::Success(media)
            | CobaltResponse::Stream(media)
            | CobaltResponse::Tunnel(media)
            | CobaltResponse::Redirect(media) => media,
            CobaltResponse::Error(failure) => {
                return Err(ExtractError::rejected(NAME, failure.message()))
            }
            CobaltResponse::Unsupported => {
                return Err(ExtractError::no_data(NAME, "unexpected status"))
            }
        };

        let has_picker_link = media.picker.iter().any(|item| item.url.is_some());
        if media.url.is_none() && media.audio.is_none() && !has_picker_link {
            return Err(ExtractError::no_data(NAME, "No download URL"));
        }

        Ok(media)
    }

    fn derived_audio_url(&self, target: &str) -> Option<String> {
        let endpoint = format!(
            "{}/api/cobalt-audio",
            self.public_base_url.trim_end_matches('/')
        );
        match Url::parse_with_params(&endpoint, &[("url", target)]) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                warn!("Cannot build audio endpoint from {}: {}", endpoint, e);
                None
            }
        }
    }

    fn to_media_info(&self, media: CobaltMedia, request: &MediaRequest) -> MediaInfo {
        let (title, extension) = split_filename(media.filename.as_deref());
        let mut formats = Vec::new();

        match &media.audio {
            Some(audio) => formats.push(FormatOption::new(
                "Audio (Best)",
                QualityClass::Audio,
                audio.clone(),
                "mp3",
            )),
            None => {
                if let Some(derived) = self.derived_audio_url(request.url()) {
                    formats.push(FormatOption::new(
                        "Audio Only",
                        QualityClass::Audio,
                        derived,
                        "mp3",
                    ));
                }
            }
        }

        if let Some(url) = media.url {
            formats.push(FormatOption::new(
                "Best Quality",
                QualityClass::Hd,
                url,
                extension.clone(),
            ));
        }

        for (idx, item) in media.picker.into_iter().enumerate() {
            let Some(url) = item.url else { continue };
            let quality = if idx == 0 {
                QualityClass::Hd
            } else {
                QualityClass::Sd
            };
            formats.push(FormatOption::new(
                format!("Quality {}", idx + 1),
                quality,
                url,
                "mp4",
            ));
        }

        MediaInfo {
            title: Some(title),
            thumbnail: None,
            platform: NAME.to_string(),
            duration: None,
            formats,
        }
    }
}

/// `"clip.mp4"` → `("clip", "mp4")`; missing names fall back to a generic
/// title and mp4.
fn split_filename(filename: Option<&str>) -> (String, String) {
    let Some(filename) = filename.filter(|f| !f.is_empty()) else {
        return ("Video".to_string(), "mp4".to_string());
    };

    match filename.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 4
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem.to_string(), ext.to_lowercase())
        }
        _ => (filename.to_string(), "mp4".to_string()),
    }
}

#[async_trait]
impl Extractor for CobaltExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cobalt
    }

    async fn extract(&self, request: &MediaRequest) -> Result<MediaInfo, ExtractError> {
        let payload = CobaltRequest::video(request.url());
        let mut last_error = None;

        for instance in &self.instances {
            info!("Trying Cobalt instance {}", instance);
            match self.try_instance(instance, &payload).await {
                Ok(media) => {
                    info!("Cobalt instance {} returned media", instance);
                    return Ok(self.to_media_info(media, request));
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Cobalt instance {} failed: {}", instance, e);
                    last_error = Some(most_specific(last_error, e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::no_data(NAME, "no instances configured")))
    }

    async fn is_available(&self) -> bool {
        for instance in &self.instances {
            match self.client.get(instance).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("✅ Cobalt instance {} is reachable", instance);
                    return true;
                }
                Ok(response) => warn!("❌ Cobalt instance {} answered {}", instance, response.status()),
                Err(e) => warn!("❌ Cobalt instance {} unreachable: {}", instance, e),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::http::build_client;
    use serde_json::json;
    use std::{collections::HashMap, time::Duration};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor(instances: Vec<String>) -> CobaltExtractor {
        let client = build_client(Duration::from_secs(5), &HashMap::new()).unwrap();
        CobaltExtractor::new(client, instances).with_public_base_url("https://proxy.example/")
    }

    fn request(url: &str) -> MediaRequest {
        MediaRequest::parse(url, &[]).unwrap()
    }

    #[test]
    fn test_split_filename() {
        assert_eq!(
            split_filename(Some("tiktok_x_123.mp4")),
            ("tiktok_x_123".to_string(), "mp4".to_string())
        );
        assert_eq!(
            split_filename(Some("clip.WEBM")),
            ("clip".to_string(), "webm".to_string())
        );
        assert_eq!(
            split_filename(Some("no extension here")),
            ("no extension here".to_string(), "mp4".to_string())
        );
        assert_eq!(split_filename(None), ("Video".to_string(), "mp4".to_string()));
    }

    #[tokio::test]
    async fn test_tunnel_response_yields_video_and_synthesized_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"downloadMode": "auto", "videoQuality": "max"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "tunnel",
                "url": "https://cdn/x.mp4",
                "filename": "tiktok_x_123.mp4"
            })))
            .mount(&server)
            .await;

        let extractor = extractor(vec![format!("{}/", server.uri())]);
        let info = extractor
            .extract(&request("https://www.tiktok.com/@x/video/123"))
            .await
            .unwrap();

        assert_eq!(info.platform, "Cobalt");
        assert_eq!(info.title.as_deref(), Some("tiktok_x_123"));
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].label, "Audio Only");
        assert_eq!(info.formats[0].quality_class, QualityClass::Audio);
        assert_eq!(
            info.formats[0].url,
            "https://proxy.example/api/cobalt-audio?url=https%3A%2F%2Fwww.tiktok.com%2F%40x%2Fvideo%2F123"
        );
        assert_eq!(info.formats[1].label, "Best Quality");
        assert_eq!(info.formats[1].url, "https://cdn/x.mp4");
        assert_eq!(info.formats[1].extension, "mp4");
    }

    #[tokio::test]
    async fn test_direct_audio_and_picker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "audio": "https://cdn/a.mp3",
                "picker": [{"url": "https://cdn/1.mp4"}, {"url": "https://cdn/2.mp4"}]
            })))
            .mount(&server)
            .await;

        let info = extractor(vec![server.uri()])
            .extract(&request("https://www.instagram.com/p/abc/"))
            .await
            .unwrap();

        let labels: Vec<&str> = info.formats.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["Audio (Best)", "Quality 1", "Quality 2"]);
        assert_eq!(info.formats[1].quality_class, QualityClass::Hd);
        assert_eq!(info.formats[2].quality_class, QualityClass::Sd);
        assert_eq!(info.title.as_deref(), Some("Video"));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_instance() {
        let broken = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&broken)
            .await;

        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "redirect",
                "url": "https://cdn/y.mp4"
            })))
            .mount(&healthy)
            .await;

        let info = extractor(vec![broken.uri(), healthy.uri()])
            .extract(&request("https://x.com/user/status/1"))
            .await
            .unwrap();
        assert_eq!(info.formats.last().unwrap().url, "https://cdn/y.mp4");
    }

    #[tokio::test]
    async fn test_rejection_is_remembered_over_transport_failure() {
        let rejecting = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "error": {"code": "error.api.link.invalid"}
            })))
            .mount(&rejecting)
            .await;

        let error = extractor(vec![
            rejecting.uri(),
            "http://127.0.0.1:1/".to_string(),
        ])
        .extract(&request("https://www.reddit.com/r/videos/comments/abc"))
        .await
        .unwrap_err();

        match error {
            ExtractError::BackendRejected { message, .. } => {
                assert_eq!(message, "error.api.link.invalid")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_status_is_no_usable_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "local-processing",
                "tunnel": ["https://cdn/a", "https://cdn/b"]
            })))
            .mount(&server)
            .await;

        let error = extractor(vec![server.uri()])
            .extract(&request("https://www.tiktok.com/@x/video/1"))
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::NoUsableData { .. }));
    }

    #[tokio::test]
    async fn test_success_without_links_is_no_usable_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "stream"})))
            .mount(&server)
            .await;

        let error = extractor(vec![server.uri()])
            .extract(&request("https://www.tiktok.com/@x/video/1"))
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::NoUsableData { .. }));
    }

    #[tokio::test]
    async fn test_picker_without_links_is_no_usable_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "tunnel",
                "picker": [{"type": "photo"}, {"type": "photo"}]
            })))
            .mount(&server)
            .await;

        let error = extractor(vec![server.uri()])
            .extract(&request("https://www.instagram.com/p/abc/"))
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::NoUsableData { .. }));
    }

    #[tokio::test]
    async fn test_no_instances() {
        let error = extractor(Vec::new())
            .extract(&request("https://www.tiktok.com/@x/video/1"))
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::NoUsableData { .. }));
    }

    #[tokio::test]
    async fn test_resolve_audio_sends_audio_mode_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Api-Key secret"))
            .and(body_partial_json(json!({"downloadMode": "audio", "audioBitrate": "320"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "tunnel",
                "url": "https://cdn/audio.mp3"
            })))
            .mount(&server)
            .await;

        let link = extractor(vec![server.uri()])
            .with_api_key(Some("secret".to_string()))
            .resolve_audio("https://www.tiktok.com/@x/video/1")
            .await
            .unwrap();
        assert_eq!(link, "https://cdn/audio.mp3");
    }

    #[tokio::test]
    async fn test_is_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cobalt": {}})))
            .mount(&server)
            .await;

        assert!(extractor(vec![server.uri()]).is_available().await);
        assert!(!extractor(vec!["http://127.0.0.1:1/".to_string()]).is_available().await);
    }
}
