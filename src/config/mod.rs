//! Configuration module for the gate service
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables (`API_KEY`, `REQUIRE_AUTH`, `RATE_LIMIT`, ...).
//! It is read once at startup and never reloaded.

use crate::auth::Credential;
use axum::http::Uri;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Attach a permissive CORS layer for browser clients
    #[serde(default)]
    pub cors: bool,
    /// Reverse proxies in front of the gate that append to `X-Forwarded-For`.
    /// 0 ignores the header and identifies clients by socket peer.
    #[serde(default)]
    pub trusted_proxies: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
            cors: false,
            trusted_proxies: 0,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Whether requests must present the credential
    #[serde(default)]
    pub require_auth: bool,
    /// The shared secret
    #[serde(default)]
    pub api_key: Credential,
    /// Header carrying the credential
    #[serde(default = "default_auth_header_name")]
    pub header_name: String,
    /// Also accept the credential as a query parameter
    #[serde(default = "default_enabled")]
    pub allow_query_param: bool,
    /// Query parameter carrying the credential
    #[serde(default = "default_query_param_name")]
    pub query_param_name: String,
}

fn default_auth_header_name() -> String {
    "X-API-Key".to_string()
}

fn default_query_param_name() -> String {
    "api_key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            api_key: Credential::default(),
            header_name: default_auth_header_name(),
            allow_query_param: true,
            query_param_name: default_query_param_name(),
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window and partition (0 disables limiting)
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Human readable form used in the health payload
    pub fn describe(&self) -> String {
        if self.enabled() {
            format!("{} requests per {}s", self.limit, self.window_secs)
        } else {
            "unlimited".to_string()
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Whether health and readiness endpoints are served
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path for the liveness endpoint
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Path for the readiness endpoint
    #[serde(default = "default_ready_path")]
    pub ready_path: String,
    /// Whether health and readiness bypass the gate
    #[serde(default = "default_enabled")]
    pub public: bool,
    /// Service identifier reported in the health payload
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_ready_path() -> String {
    "/ready".to_string()
}

fn default_service_name() -> String {
    "hyperliquid-mcp".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_path(),
            ready_path: default_ready_path(),
            public: true,
            service_name: default_service_name(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path to expose metrics
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

/// Upstream MCP server configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL admitted requests are forwarded to (plain HTTP)
    #[serde(default)]
    pub url: Option<String>,
}

/// Main gate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load configuration from a TOML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration: optional file, then process environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
            None => GatewayConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("API_KEY") {
            self.auth.api_key = Credential::new(key);
        }
        if let Some(value) = lookup("REQUIRE_AUTH") {
            self.auth.require_auth = parse_bool("REQUIRE_AUTH", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT") {
            self.rate_limit.limit = parse_number("RATE_LIMIT", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_number("RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_number("PORT", &value)?;
        }
        if let Some(value) = lookup("TRUSTED_PROXIES") {
            self.server.trusted_proxies = parse_number("TRUSTED_PROXIES", &value)?;
        }
        if let Some(url) = lookup("UPSTREAM_URL") {
            self.upstream.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(value) = lookup("HEALTH_PUBLIC") {
            self.health.public = parse_bool("HEALTH_PUBLIC", &value)?;
        }
        if let Some(name) = lookup("SERVICE_NAME") {
            self.health.service_name = name;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.require_auth && self.auth.api_key.is_empty() {
            anyhow::bail!("Authentication is required but no API key is configured");
        }

        if self.auth.header_name.parse::<axum::http::HeaderName>().is_err() {
            anyhow::bail!("Invalid auth header name '{}'", self.auth.header_name);
        }

        if self.rate_limit.enabled() && self.rate_limit.window_secs == 0 {
            anyhow::bail!("Rate limit window must be at least one second");
        }

        let paths = [
            &self.health.path,
            &self.health.ready_path,
            &self.metrics.path,
        ];
        for (i, path) in paths.iter().enumerate() {
            if !path.starts_with('/') || path.len() < 2 {
                anyhow::bail!("Endpoint path '{}' must start with '/' and not be the root", path);
            }
            if paths[..i].contains(path) {
                anyhow::bail!("Endpoint path '{}' is configured more than once", path);
            }
        }

        if let Some(url) = &self.upstream.url {
            let uri: Uri = url
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid upstream URL '{}': {}", url, e))?;
            if uri.scheme_str() != Some("http") || uri.authority().is_none() {
                anyhow::bail!("Upstream URL '{}' must be an absolute http:// URL", url);
            }
        }

        Ok(())
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Paths that bypass the gate
    pub fn exempt_paths(&self) -> Vec<String> {
        if self.health.enabled && self.health.public {
            vec![self.health.path.clone(), self.health.ready_path.clone()]
        } else {
            vec![]
        }
    }
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", name, other),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got '{}'", name, value))
}
