use super::{
    error::ExtractError,
    types::{MediaInfo, MediaRequest},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which family of backend an adapter talks to. Route tables refer to
/// adapters by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted tunnel service returning ready-made links.
    Cobalt,
    /// General-purpose extractor returning raw formats.
    Ytdlp,
    /// Community mirror API, tried instance by instance.
    Invidious,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cobalt => "cobalt",
            Self::Ytdlp => "ytdlp",
            Self::Invidious => "invidious",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name of the backend
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Extract canonical media info for the request
    async fn extract(&self, request: &MediaRequest) -> Result<MediaInfo, ExtractError>;

    /// Whether the backend currently answers at all
    async fn is_available(&self) -> bool;
}
