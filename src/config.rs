// src/config.rs
//! Application configuration, loaded from TOML with per-field defaults.
//!
//! Lookup order for [`AppConfig::load_default`]:
//! 1) `$FEEDS_CONFIG_PATH`
//! 2) `config/feeds.toml`
//! 3) built-in defaults
//!
//! A few deployment knobs can also be overridden from the environment (`.env` is honoured by the
//! binary): `FEEDS_CACHE_BACKEND`, `REDIS_URL`, `FEEDS_BIND_ADDR`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::model::{FeedKind, SourceCategory, SourceInfo};

pub const ENV_CONFIG_PATH: &str = "FEEDS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/feeds.toml";

/// Lifetime used for a snapshot configured not to expire (ten years).
pub const SNAPSHOT_NO_EXPIRY: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

const ENV_CACHE_BACKEND: &str = "FEEDS_CACHE_BACKEND";
const ENV_REDIS_URL: &str = "REDIS_URL";
const ENV_BIND_ADDR: &str = "FEEDS_BIND_ADDR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub http: HttpConfig,
    pub sources: Vec<SourceInfo>,
    /// Tag name → keyword phrases. Replaces the built-in categories with the same name.
    pub tags: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the background refresh scheduler; 0 disables it.
    pub refresh_interval_secs: u64,
    /// Bound applied to a refresh whose context carries no deadline.
    pub refresh_timeout_secs: u64,
    pub default_limit: usize,
    pub max_limit: usize,
    /// How long a snapshot stays readable without a successful refresh. Once it lapses, reads
    /// return empty pages until a refresh succeeds again. 0 keeps the last snapshot forever.
    pub snapshot_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 900,
            refresh_timeout_secs: 120,
            default_limit: 20,
            max_limit: 100,
            snapshot_ttl_secs: 24 * 3600,
        }
    }
}

impl EngineConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Snapshot entry lifetime; `snapshot_ttl_secs = 0` maps to [`SNAPSHOT_NO_EXPIRY`].
    pub fn snapshot_ttl(&self) -> Duration {
        match self.snapshot_ttl_secs {
            0 => SNAPSHOT_NO_EXPIRY,
            secs => Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    /// Key prefix for the shared backend; `clear` never touches keys outside it.
    pub namespace: String,
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            namespace: "feeds".to_string(),
            default_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub min_interval_ms: u64,
    /// Share limiter state across instances through the cache backend (best effort).
    pub distributed: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            distributed: false,
        }
    }
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("feed-aggregator/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 20,
            connect_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        if cfg.sources.is_empty() {
            cfg.sources = default_sources();
        }
        cfg.sanitize()?;
        Ok(cfg)
    }

    /// Env path, then `config/feeds.toml`, then built-in defaults; env overrides applied last.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::builtin()
            }
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn builtin() -> Self {
        Self {
            sources: default_sources(),
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(b) = std::env::var(ENV_CACHE_BACKEND) {
            self.cache.backend = match b.trim().to_ascii_lowercase().as_str() {
                "memory" => CacheBackend::Memory,
                "redis" => CacheBackend::Redis,
                other => return Err(anyhow!("unsupported {ENV_CACHE_BACKEND}: {other}")),
            };
        }
        if let Ok(url) = std::env::var(ENV_REDIS_URL) {
            if !url.trim().is_empty() {
                self.cache.redis_url = Some(url.trim().to_string());
            }
        }
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            if !addr.trim().is_empty() {
                self.server.bind_addr = addr.trim().to_string();
            }
        }
        Ok(())
    }

    /// Clamp nonsensical values and reject duplicate source ids.
    fn sanitize(&mut self) -> Result<()> {
        let e = &mut self.engine;
        if e.default_limit == 0 {
            e.default_limit = EngineConfig::default().default_limit;
        }
        if e.max_limit < e.default_limit {
            e.max_limit = e.default_limit;
        }
        if e.refresh_timeout_secs == 0 {
            e.refresh_timeout_secs = EngineConfig::default().refresh_timeout_secs;
        }
        if self.cache.sweep_interval_secs == 0 {
            self.cache.sweep_interval_secs = CacheConfig::default().sweep_interval_secs;
        }

        let mut seen = std::collections::HashSet::new();
        for s in &mut self.sources {
            s.id = s.id.trim().to_string();
            if s.id.is_empty() {
                return Err(anyhow!("source with empty id ({})", s.feed_url));
            }
            if !seen.insert(s.id.clone()) {
                return Err(anyhow!("duplicate source id: {}", s.id));
            }
            if s.display_name.trim().is_empty() {
                s.display_name = s.id.clone();
            }
        }
        Ok(())
    }
}

fn source(
    id: &str,
    name: &str,
    url: &str,
    category: SourceCategory,
    kind: FeedKind,
) -> SourceInfo {
    SourceInfo {
        id: id.to_string(),
        display_name: name.to_string(),
        feed_url: url.to_string(),
        source_type: category,
        feed_kind: kind,
        enabled: true,
    }
}

/// Built-in seed used when no sources are configured.
pub fn default_sources() -> Vec<SourceInfo> {
    use FeedKind::{Reddit, Rss};
    use SourceCategory::{Community, News};
    vec![
        source("dronedj", "DroneDJ", "https://dronedj.com/feed/", News, Rss),
        source("dronelife", "DroneLife", "https://dronelife.com/feed/", News, Rss),
        source("dronexl", "DroneXL", "https://dronexl.co/feed/", News, Rss),
        source(
            "r-fpv",
            "r/fpv",
            "https://www.reddit.com/r/fpv/hot.json?limit=25",
            Community,
            Reddit,
        ),
        source(
            "r-drones",
            "r/drones",
            "https://www.reddit.com/r/drones/hot.json?limit=25",
            Community,
            Reddit,
        ),
    ]
}
