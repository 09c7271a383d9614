//! Configuration management for SelfSync.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SelfSyncError};
use crate::ratelimit::{LimitConfig, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

/// Name of the rate limited project lookup route.
pub const PROJECTS_ROUTE: &str = "projects";

/// Name of the rate limited last-modified lookup route.
pub const LAST_MODIFIED_ROUTE: &str = "last_modified";

/// Environment variable consulted when no admin key is configured.
pub const ADMIN_API_KEY_ENV: &str = "SELFSYNC_ADMIN_API_KEY";

/// Main configuration for the SelfSync service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfSyncConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Administrative endpoint configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Directory holding the downloadable project folders
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            projects_root: default_projects_root(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("Projects")
}

/// Administrative endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret expected in the `X-API-Key` header.
    /// Admin endpoints refuse to work while this is unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Limits per protected route name
    #[serde(default = "default_routes")]
    pub routes: HashMap<String, RouteLimitConfig>,

    /// How often expired windows are swept, in seconds (0 disables sweeping)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            routes: default_routes(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// The limit for a route, falling back to the defaults.
    pub fn limit_for(&self, route: &str) -> LimitConfig {
        self.routes
            .get(route)
            .map(LimitConfig::from)
            .unwrap_or_default()
    }

    /// Sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_routes() -> HashMap<String, RouteLimitConfig> {
    HashMap::from([
        (PROJECTS_ROUTE.to_string(), RouteLimitConfig::default()),
        (LAST_MODIFIED_ROUTE.to_string(), RouteLimitConfig::default()),
    ])
}

fn default_sweep_interval() -> u64 {
    300
}

/// Limit settings for one protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimitConfig {
    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RouteLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

impl From<&RouteLimitConfig> for LimitConfig {
    fn from(route: &RouteLimitConfig) -> Self {
        LimitConfig::new(route.max_requests, Duration::from_secs(route.window_secs))
    }
}

impl SelfSyncConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SelfSyncError::Config(e.to_string()))
    }

    /// Load configuration from an optional YAML file layered with environment
    /// variables.
    ///
    /// Variables use the `SELFSYNC__` prefix and `__` as the section separator,
    /// e.g. `SELFSYNC__SERVER__HTTP_ADDR`. The admin key additionally falls back
    /// to `SELFSYNC_ADMIN_API_KEY`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let mut loaded: SelfSyncConfig = builder
            .add_source(
                config::Environment::with_prefix("SELFSYNC")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if loaded.admin.api_key.is_none() {
            loaded.admin.api_key = std::env::var(ADMIN_API_KEY_ENV)
                .ok()
                .filter(|key| !key.is_empty());
        }

        Ok(loaded)
    }
}
