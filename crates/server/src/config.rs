//! Server configuration.
//!
//! Loaded once from a YAML file (JSON also parses, being a YAML subset) and
//! consumed read-only by the core. Everything except the API list has a
//! default.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// SmartAPI-style registry base URL.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Default hit count for registry searches.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Spec cache time-to-live in seconds.
    #[serde(default = "default_spec_ttl_secs")]
    pub spec_ttl_secs: u64,

    /// Per-request timeout for registry and upstream HTTP, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Outbound concurrency cap; calls beyond it queue.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    /// APIs to onboard at startup.
    #[serde(default)]
    pub apis: Vec<ApiConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            search_limit: default_search_limit(),
            spec_ttl_secs: default_spec_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            retry: RetryConfig::default(),
            apis: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// One API to bridge, identified by its registry id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Registry identifier.
    pub id: String,

    /// Override for the base URL the spec declares in `servers`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Explicit credential placement. Wins over `apiKey`.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Bare credential; placed according to the spec's declared security
    /// scheme (apiKey header/query or http bearer).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ApiConfig {
    #[must_use]
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: None,
            auth: None,
            api_key: None,
        }
    }
}

/// How to attach a credential to outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AuthConfig {
    Bearer { token: String },
    Header { name: String, value: String },
    Basic { username: String, password: String },
    Query { name: String, value: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_registry_url() -> String {
    "https://smart-api.info/api".to_string()
}
fn default_search_limit() -> usize {
    10
}
fn default_spec_ttl_secs() -> u64 {
    900
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
