mod cache;
mod cobalt;
mod error;
mod extractor;
mod http;
mod invidious;
mod normalize;
mod orchestrator;
mod platform;
mod types;
mod utils;
mod ytdlp;

pub use cache::ResultCache;
pub use cobalt::CobaltExtractor;
pub use error::ExtractError;
pub use extractor::{BackendKind, Extractor};
pub use orchestrator::{ExtractionOrchestrator, Route, RoutePolicy};
pub use platform::PlatformClassifier;
pub use types::{MediaInfo, MediaRequest, Platform};

use crate::config::Config;
use anyhow::Result;
use invidious::InvidiousExtractor;
use normalize::FormatNormalizer;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use ytdlp::YtDlpExtractor;

/// Cache-fronted entry point used by the HTTP server and the CLI.
pub struct MediaService {
    orchestrator: ExtractionOrchestrator,
    cache: ResultCache,
    audio_resolver: Option<Arc<CobaltExtractor>>,
    tracking_params: Vec<String>,
}

impl MediaService {
    pub fn new(
        orchestrator: ExtractionOrchestrator,
        cache: ResultCache,
        tracking_params: Vec<String>,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            audio_resolver: None,
            tracking_params,
        }
    }

    pub fn with_audio_resolver(mut self, resolver: Arc<CobaltExtractor>) -> Self {
        self.audio_resolver = Some(resolver);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let extraction = &config.extraction;
        let client = http::build_client(extraction.instance_timeout(), &config.dns.overrides)?;
        let normalizer =
            FormatNormalizer::new(extraction.min_height, extraction.size_units.clone());

        let cobalt = Arc::new(
            CobaltExtractor::new(client.clone(), config.cobalt.instances.clone())
                .with_api_key(config.cobalt.api_key.clone())
                .with_public_base_url(config.server.public_base_url.clone())
                .with_user_agents(extraction.user_agents.clone()),
        );
        let ytdlp = YtDlpExtractor::new(config.ytdlp.binary.clone(), extraction.instance_timeout())
            .with_cookies_file(config.ytdlp.cookies_file.clone())
            .with_user_agents(extraction.user_agents.clone())
            .with_normalizer(normalizer);

        let policy = config
            .routes
            .iter()
            .fold(RoutePolicy::default(), |policy, (platform, route)| {
                policy.with_route(*platform, *route)
            });

        let mut orchestrator = ExtractionOrchestrator::new(
            PlatformClassifier::default(),
            policy,
            extraction.request_budget(),
        )
        .with_extractor(cobalt.clone())
        .with_extractor(Arc::new(ytdlp));

        if !config.invidious.instances.is_empty() {
            let invidious = InvidiousExtractor::new(client, config.invidious.instances.clone())?
                .with_max_video_formats(config.invidious.max_video_formats)
                .with_min_height(extraction.min_height);
            orchestrator = orchestrator.with_extractor(Arc::new(invidious));
        }

        let cache = ResultCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.capacity,
        );

        info!(
            "Media service initialized with {} backends",
            orchestrator.extractors().count()
        );

        Ok(Self::new(orchestrator, cache, extraction.tracking_params.clone())
            .with_audio_resolver(cobalt))
    }

    pub fn parse_request(&self, raw: &str) -> Result<MediaRequest, ExtractError> {
        MediaRequest::parse(raw, &self.tracking_params)
    }

    pub async fn get_info(&self, raw: &str) -> Result<MediaInfo, ExtractError> {
        let request = self.parse_request(raw)?;
        info!("Processing URL: {}", request.url());

        if let Some(cached) = self.cache.get(&request) {
            info!("Cache hit for {}", request.url());
            return Ok(cached);
        }

        let media_info = self.orchestrator.extract(&request).await?;
        self.cache.put(&request, media_info.clone());
        Ok(media_info)
    }

    pub async fn resolve_audio(&self, raw: &str) -> Result<String, ExtractError> {
        let request = self.parse_request(raw)?;
        match &self.audio_resolver {
            Some(resolver) => resolver.resolve_audio(request.url()).await,
            None => Err(ExtractError::no_data("cobalt", "audio resolver not configured")),
        }
    }

    pub fn clear_cache(&self) -> usize {
        let dropped = self.cache.len();
        self.cache.clear();
        dropped
    }

    /// Availability of every registered backend, sorted by name.
    pub async fn health(&self) -> Vec<(&'static str, bool)> {
        let mut report = Vec::new();
        for extractor in self.orchestrator.extractors() {
            report.push((extractor.name(), extractor.is_available().await));
        }
        report.sort_by_key(|(name, _)| *name);
        report
    }

    pub async fn test_setup(&self) -> Result<()> {
        info!("Testing extraction backends...");

        let report = self.health().await;
        for (name, available) in &report {
            if !available {
                warn!("{} is unavailable", name);
            }
        }

        if report.iter().any(|(_, available)| *available) {
            info!("✅ At least one extraction backend is available");
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "No extraction backends are available. Install yt-dlp or configure a reachable Cobalt instance."
            ))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{service, StaticExtractor};
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let cobalt = StaticExtractor::ok(BackendKind::Cobalt);
        let service = service(vec![cobalt.clone()]);

        service
            .get_info("https://www.tiktok.com/@x/video/1?si=first")
            .await
            .unwrap();
        service
            .get_info("https://www.tiktok.com/@x/video/1?si=second")
            .await
            .unwrap();

        assert_eq!(cobalt.calls(), 1);
        assert_eq!(service.clear_cache(), 1);

        service
            .get_info("https://www.tiktok.com/@x/video/1")
            .await
            .unwrap();
        assert_eq!(cobalt.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cobalt = StaticExtractor::failing(
            BackendKind::Cobalt,
            ExtractError::transport("cobalt", "connection refused"),
        );
        let ytdlp = StaticExtractor::failing(
            BackendKind::Ytdlp,
            ExtractError::rejected("yt-dlp", "ERROR: Private video"),
        );
        let service = service(vec![cobalt.clone(), ytdlp.clone()]);

        for _ in 0..2 {
            let error = service
                .get_info("https://www.instagram.com/reel/abc/")
                .await
                .unwrap_err();
            assert!(matches!(error, ExtractError::AllBackendsFailed { .. }));
        }
        assert_eq!(cobalt.calls(), 2);
        assert_eq!(ytdlp.calls(), 2);
    }

    #[tokio::test]
    async fn test_bad_input_never_reaches_backends() {
        let cobalt = StaticExtractor::ok(BackendKind::Cobalt);
        let service = service(vec![cobalt.clone()]);

        let error = service.get_info("   ").await.unwrap_err();
        assert!(matches!(error, ExtractError::RequestShape(_)));
        let error = service.get_info("ftp://example.com/a").await.unwrap_err();
        assert!(matches!(error, ExtractError::RequestShape(_)));
        assert_eq!(cobalt.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_audio_without_resolver() {
        let service = service(vec![]);
        let error = service
            .resolve_audio("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::NoUsableData { .. }));
    }

    #[tokio::test]
    async fn test_health_report() {
        let service = service(vec![
            StaticExtractor::ok(BackendKind::Ytdlp),
            StaticExtractor::failing(BackendKind::Cobalt, ExtractError::transport("cobalt", "down")),
        ]);

        assert_eq!(
            service.health().await,
            vec![("cobalt", false), ("ytdlp", true)]
        );
        assert!(service.test_setup().await.is_ok());
    }

    #[tokio::test]
    async fn test_tiktok_goes_through_cobalt_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "url": "https://www.tiktok.com/@x/video/123",
                "downloadMode": "auto"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "url": "https://cdn/x.mp4",
                "filename": "x.mp4"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.cobalt.instances = vec![server.uri()];
        config.ytdlp.binary = "definitely-not-a-yt-dlp-binary".to_string();
        config.server.public_base_url = "https://proxy.example".to_string();
        let service = MediaService::from_config(&config).unwrap();

        let info = service
            .get_info("https://www.tiktok.com/@x/video/123")
            .await
            .unwrap();

        assert_eq!(info.platform, "Cobalt");
        assert_eq!(info.title.as_deref(), Some("x"));
        let labels: Vec<&str> = info.formats.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["Audio Only", "Best Quality"]);
        assert_eq!(info.formats[1].url, "https://cdn/x.mp4");
        assert!(info.formats[0]
            .url
            .starts_with("https://proxy.example/api/cobalt-audio?url="));

        // served from cache, the mock still sees a single call
        service
            .get_info("https://www.tiktok.com/@x/video/123")
            .await
            .unwrap();
    }

    #[test]
    fn test_from_default_config() {
        let service = MediaService::from_config(&Config::default()).unwrap();
        let names: Vec<&str> = service.orchestrator.extractors().map(|e| e.name()).collect();
        assert_eq!(names.len(), 2);
        assert!(service.audio_resolver.is_some());
    }

    #[test]
    fn test_from_config_with_invidious() {
        let config = Config::from_toml(
            r#"
[invidious]
instances = ["https://yewtu.be"]

[routes.youtube]
primary = "invidious"
fallback = "cobalt"
"#,
        )
        .unwrap();
        let service = MediaService::from_config(&config).unwrap();
        assert_eq!(service.orchestrator.extractors().count(), 3);
    }
}
