use crate::media::{BackendKind, Platform, Route};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub extraction: ExtractionConfig,
    pub cobalt: CobaltConfig,
    pub ytdlp: YtDlpConfig,
    pub invidious: InvidiousConfig,
    pub dns: DnsConfig,
    /// Per-platform overrides of the default primary/fallback table.
    pub routes: HashMap<Platform, Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Externally reachable base URL, used for derived endpoint links.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            public_base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub instance_timeout_secs: u64,
    pub request_budget_secs: u64,
    pub min_height: u32,
    pub size_units: Vec<String>,
    pub user_agents: Vec<String>,
    /// Query parameters stripped before extraction. A trailing `*` matches
    /// by prefix.
    pub tracking_params: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            instance_timeout_secs: 15,
            request_budget_secs: 60,
            min_height: 360,
            size_units: ["B", "KB", "MB", "GB", "TB"]
                .iter()
                .map(|u| u.to_string())
                .collect(),
            user_agents: [
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ]
            .iter()
            .map(|ua| ua.to_string())
            .collect(),
            tracking_params: ["si", "utm_*", "fbclid", "igshid"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl ExtractionConfig {
    pub fn instance_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_timeout_secs)
    }

    pub fn request_budget(&self) -> Duration {
        Duration::from_secs(self.request_budget_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CobaltConfig {
    pub instances: Vec<String>,
    pub api_key: Option<String>,
}

impl Default for CobaltConfig {
    fn default() -> Self {
        Self {
            instances: vec!["https://api.cobalt.tools/".to_string()],
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    pub binary: String,
    pub cookies_file: Option<PathBuf>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            cookies_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvidiousConfig {
    pub instances: Vec<String>,
    pub max_video_formats: usize,
}

impl Default for InvidiousConfig {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            max_video_formats: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub overrides: HashMap<String, Vec<SocketAddr>>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    fn validate(&self) -> Result<()> {
        if self.extraction.instance_timeout_secs == 0 {
            anyhow::bail!("extraction.instance_timeout_secs must be greater than zero");
        }
        if self.extraction.request_budget_secs == 0 {
            anyhow::bail!("extraction.request_budget_secs must be greater than zero");
        }
        let routes_to_invidious = self
            .routes
            .values()
            .any(|r| r.primary == BackendKind::Invidious || r.fallback == BackendKind::Invidious);
        if routes_to_invidious && self.invidious.instances.is_empty() {
            anyhow::bail!("routes use invidious but invidious.instances is empty");
        }
        Ok(())
    }
}
