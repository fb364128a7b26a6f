use super::{
    error::ExtractError,
    extractor::{BackendKind, Extractor},
    platform::PlatformClassifier,
    types::{MediaInfo, MediaRequest, Platform},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

/// Hard ceiling for one request across both attempts.
pub const MAX_REQUEST_BUDGET: Duration = Duration::from_secs(60);

/// Which backend to try first for a platform and which one to fall back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub primary: BackendKind,
    pub fallback: BackendKind,
}

impl Route {
    pub const fn new(primary: BackendKind, fallback: BackendKind) -> Self {
        Self { primary, fallback }
    }
}

/// Platform → route table. Social platforms go to the tunnel service first
/// since it avoids bot detection there; long-form platforms go to the
/// general extractor first.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    routes: HashMap<Platform, Route>,
    default: Route,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        let tunnel_first = Route::new(BackendKind::Cobalt, BackendKind::Ytdlp);
        let routes = [
            Platform::Tiktok,
            Platform::Instagram,
            Platform::Twitter,
            Platform::Reddit,
        ]
        .into_iter()
        .map(|platform| (platform, tunnel_first))
        .collect();

        Self {
            routes,
            default: Route::new(BackendKind::Ytdlp, BackendKind::Cobalt),
        }
    }
}

impl RoutePolicy {
    pub fn with_route(mut self, platform: Platform, route: Route) -> Self {
        self.routes.insert(platform, route);
        self
    }

    pub fn route_for(&self, platform: Platform) -> Route {
        self.routes.get(&platform).copied().unwrap_or(self.default)
    }
}

/// Runs the primary backend, then the fallback, and fails only when both
/// did. Attempts are sequential and share one deadline.
pub struct ExtractionOrchestrator {
    classifier: PlatformClassifier,
    policy: RoutePolicy,
    extractors: HashMap<BackendKind, Arc<dyn Extractor>>,
    request_budget: Duration,
}

impl ExtractionOrchestrator {
    pub fn new(classifier: PlatformClassifier, policy: RoutePolicy, request_budget: Duration) -> Self {
        Self {
            classifier,
            policy,
            extractors: HashMap::new(),
            request_budget: request_budget.min(MAX_REQUEST_BUDGET),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(extractor.kind(), extractor);
        self
    }

    pub fn extractors(&self) -> impl Iterator<Item = &Arc<dyn Extractor>> {
        self.extractors.values()
    }

    pub fn classify(&self, url: &str) -> Platform {
        self.classifier.classify(url)
    }

    pub async fn extract(&self, request: &MediaRequest) -> Result<MediaInfo, ExtractError> {
        let platform = self.classify(request.url());
        let route = self.policy.route_for(platform);
        let deadline = Instant::now() + self.request_budget;

        info!(
            "Detected platform: {} (primary: {}, fallback: {})",
            platform.display_name(),
            route.primary,
            route.fallback
        );

        let primary_error = match self.attempt(route.primary, request, deadline).await {
            Ok(media_info) => return Ok(media_info),
            Err(e) => e,
        };
        warn!("✗ {} failed: {}, trying {}", route.primary, primary_error, route.fallback);

        let fallback_error = match self.attempt(route.fallback, request, deadline).await {
            Ok(media_info) => return Ok(media_info),
            Err(e) => e,
        };
        warn!("✗ {} failed: {}", route.fallback, fallback_error);

        Err(ExtractError::AllBackendsFailed {
            platform,
            primary: Box::new(primary_error),
            fallback: Box::new(fallback_error),
        })
    }

    async fn attempt(
        &self,
        kind: BackendKind,
        request: &MediaRequest,
        deadline: Instant,
    ) -> Result<MediaInfo, ExtractError> {
        let Some(extractor) = self.extractors.get(&kind) else {
            return Err(ExtractError::no_data(kind.as_str(), "backend not configured"));
        };

        info!("Trying {}...", extractor.name());

        // dropping the future on timeout cancels the in-flight call
        match tokio::time::timeout_at(deadline, extractor.extract(request)).await {
            Err(_) => Err(ExtractError::transport(
                extractor.name(),
                "request budget exhausted",
            )),
            Ok(Ok(media_info)) if media_info.has_formats() => {
                info!(
                    "✓ {} succeeded with {} formats",
                    extractor.name(),
                    media_info.formats.len()
                );
                Ok(media_info)
            }
            Ok(Ok(_)) => Err(ExtractError::no_data(extractor.name(), "no formats")),
            Ok(Err(e)) => Err(e),
        }
    }
}
