use crate::media::{ExtractError, MediaService};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

type AppState = Arc<MediaService>;

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct AudioQuery {
    url: String,
}

pub fn router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/download", post(download_handler))
        .route("/api/cobalt-audio", get(cobalt_audio_handler))
        .route("/api/clear-cache", get(clear_cache_handler))
        .layer(cors)
        .with_state(service)
}

pub async fn serve(bind: SocketAddr, service: AppState) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, router(service))
        .await
        .context("HTTP server failed")
}

fn error_response(error: &ExtractError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": error.user_message() })),
    )
        .into_response()
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "features": ["Cobalt", "yt-dlp", "Invidious", "Auto-fallback"],
    }))
}

async fn health_handler(State(service): State<AppState>) -> Json<Value> {
    let report = service.health().await;
    let status = if report.iter().any(|(_, available)| *available) {
        "healthy"
    } else {
        "degraded"
    };

    let backends: Map<String, Value> = report
        .into_iter()
        .map(|(name, available)| {
            let status = if available { "operational" } else { "unavailable" };
            (name.to_string(), Value::from(status))
        })
        .collect();

    Json(json!({
        "status": status,
        "backends": backends,
    }))
}

async fn download_handler(
    State(service): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    match service.get_info(&request.url).await {
        Ok(media_info) => Json(media_info).into_response(),
        Err(e) => {
            warn!("Extraction failed for {}: {}", request.url, e);
            error_response(&e)
        }
    }
}

async fn cobalt_audio_handler(
    State(service): State<AppState>,
    Query(query): Query<AudioQuery>,
) -> Response {
    match service.resolve_audio(&query.url).await {
        Ok(link) => Redirect::temporary(&link).into_response(),
        Err(e) => {
            warn!("Audio resolution failed for {}: {}", query.url, e);
            error_response(&e)
        }
    }
}

async fn clear_cache_handler(State(service): State<AppState>) -> Json<Value> {
    let dropped = service.clear_cache();
    info!("Cache cleared ({} entries)", dropped);
    Json(json!({ "status": "ok", "message": "Cache cleared" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        testing::{service, StaticExtractor},
        BackendKind, CobaltExtractor,
    };
    use axum::http::header::LOCATION;
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root() {
        let Json(body) = root_handler().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "vidproxy");
    }

    #[tokio::test]
    async fn test_download_success() {
        let state = Arc::new(service(vec![StaticExtractor::ok(BackendKind::Cobalt)]));

        let response = download_handler(
            State(state),
            Json(DownloadRequest {
                url: "https://www.tiktok.com/@x/video/1".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["title"], "clip");
        assert_eq!(body["formats"][0]["label"], "Best Quality");
        assert_eq!(body["formats"][0]["quality"], "hd");
    }

    #[tokio::test]
    async fn test_download_failure_is_friendly() {
        let state = Arc::new(service(vec![
            StaticExtractor::failing(
                BackendKind::Cobalt,
                ExtractError::rejected("cobalt", "error.api.content.video.private"),
            ),
            StaticExtractor::failing(
                BackendKind::Ytdlp,
                ExtractError::rejected("yt-dlp", "ERROR: Private video"),
            ),
        ]));

        let response = download_handler(
            State(state),
            Json(DownloadRequest {
                url: "https://www.instagram.com/reel/abc/".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "This video is private and cannot be downloaded");
    }

    #[tokio::test]
    async fn test_download_rejects_bad_url() {
        let state = Arc::new(service(vec![StaticExtractor::ok(BackendKind::Cobalt)]));

        let response = download_handler(
            State(state),
            Json(DownloadRequest {
                url: "not a url".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["detail"].as_str().unwrap().starts_with("Invalid URL format"));
    }

    #[tokio::test]
    async fn test_health() {
        let state = Arc::new(service(vec![
            StaticExtractor::ok(BackendKind::Ytdlp),
            StaticExtractor::failing(BackendKind::Cobalt, ExtractError::transport("cobalt", "down")),
        ]));

        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backends"]["ytdlp"], "operational");
        assert_eq!(body["backends"]["cobalt"], "unavailable");
    }

    #[tokio::test]
    async fn test_cobalt_audio_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"downloadMode": "audio"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "redirect",
                "url": "https://cdn/audio.mp3"
            })))
            .mount(&server)
            .await;

        let resolver = Arc::new(CobaltExtractor::new(reqwest::Client::new(), vec![server.uri()]));
        let state = Arc::new(service(vec![]).with_audio_resolver(resolver));

        let response = cobalt_audio_handler(
            State(state),
            Query(AudioQuery {
                url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "https://cdn/audio.mp3");
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let cobalt = StaticExtractor::ok(BackendKind::Cobalt);
        let state = Arc::new(service(vec![cobalt.clone()]));
        state.get_info("https://www.tiktok.com/@x/video/1").await.unwrap();

        let Json(body) = clear_cache_handler(State(state.clone())).await;
        assert_eq!(body["status"], "ok");

        state.get_info("https://www.tiktok.com/@x/video/1").await.unwrap();
        assert_eq!(cobalt.calls(), 2);
    }
}
