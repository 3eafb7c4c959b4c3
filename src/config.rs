//! Gateway configuration
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Command-line arguments (highest)
//! 2. Environment variables (CONCIERGE_*, then legacy OPENAI_*)
//! 3. Config file (--config, ./concierge.toml or ~/.concierge/config.toml)
//! 4. Default values (lowest)
//!
//! The resulting [`GatewayConfig`] is immutable once the gateway starts.

use super::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream API credential.
///
/// `Debug` and `Display` render a placeholder and there is no `Serialize`
/// impl, so the key only leaves the process as a bearer header.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        ApiKey(key.into())
    }

    /// Raw key, for building the `Authorization` header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() { "ApiKey(<unset>)" } else { "ApiKey(***)" })
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() { "<unset>" } else { "***" })
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(ApiKey)
    }
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to listen on
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8848,
        }
    }
}

/// Upstream API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`
    pub api_base: String,

    /// API key, sent as a bearer credential
    #[serde(skip_serializing)]
    pub api_key: ApiKey,

    /// Request timeout in seconds (default: 120)
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds (default: 10)
    pub connect_timeout_secs: u64,

    /// Model used when a request does not name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: ApiKey::default(),
            timeout_secs: 120,
            connect_timeout_secs: 10,
            default_model: None,
        }
    }
}

impl UpstreamConfig {
    /// Upstream config for an OpenAI-compatible endpoint
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: ApiKey::new(api_key),
            ..Self::default()
        }
    }

    /// Get the request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    /// Host part of the base URL, safe to put in logs
    pub fn host(&self) -> String {
        reqwest::Url::parse(&self.api_base)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "<invalid>".to_string())
    }

    /// Check that both required values are present and the base URL is usable
    pub fn validate(&self) -> Result<()> {
        if self.api_base.trim().is_empty() {
            return Err(Error::ConfigMissing("api_base"));
        }
        if self.api_key.is_empty() {
            return Err(Error::ConfigMissing("api_key"));
        }
        let url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| Error::Config(format!("Invalid api_base '{}': {}", self.api_base, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "Invalid api_base scheme '{}': must be http or https",
                url.scheme()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Back-pressure settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of concurrent sessions (default: 64)
    pub max_sessions: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_sessions: 64 }
    }
}

/// Complete gateway configuration
///
/// ```toml
/// [server]
/// host = "127.0.0.1"
/// port = 8848
///
/// [upstream]
/// api_base = "https://api.openai.com/v1"
/// api_key = "sk-..."
/// timeout_secs = 120
/// default_model = "gpt-4"
///
/// [limits]
/// max_sessions = 64
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub limits: LimitsConfig,
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}={:?} is invalid: {}", key, value, e)))
}

/// Values supplied on the command line; `None` leaves the lower layer alone
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub max_sessions: Option<usize>,
    pub default_model: Option<String>,
}

impl GatewayConfig {
    /// Gateway config with default settings around the given upstream
    pub fn with_upstream(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            upstream: UpstreamConfig::new(api_base, api_key),
            ..Self::default()
        }
    }

    /// Load configuration from all layers.
    ///
    /// `config_path` takes precedence over the default locations; a missing
    /// explicit file is an error, missing default files are not.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// First existing default config file, if any
    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from("./concierge.toml");
        if local.exists() {
            return Some(local);
        }
        let home = dirs::home_dir()?.join(".concierge").join("config.toml");
        home.exists().then_some(home)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment variables through `lookup`.
    ///
    /// `CONCIERGE_API_BASE`/`CONCIERGE_API_KEY` win over the legacy
    /// `OPENAI_API_BASE`/`OPENAI_API_KEY`. Numeric variables that do not
    /// parse are a `Config` error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base) = non_empty("CONCIERGE_API_BASE").or_else(|| non_empty("OPENAI_API_BASE")) {
            self.upstream.api_base = base;
        }
        if let Some(key) = non_empty("CONCIERGE_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
            self.upstream.api_key = ApiKey::new(key);
        }
        if let Some(model) = non_empty("CONCIERGE_MODEL") {
            self.upstream.default_model = Some(model);
        }
        if let Some(host) = non_empty("CONCIERGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("CONCIERGE_PORT") {
            self.server.port = parse_env("CONCIERGE_PORT", &port)?;
        }
        if let Some(secs) = non_empty("CONCIERGE_TIMEOUT_SECS") {
            self.upstream.timeout_secs = parse_env("CONCIERGE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(max) = non_empty("CONCIERGE_MAX_SESSIONS") {
            self.limits.max_sessions = parse_env("CONCIERGE_MAX_SESSIONS", &max)?;
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base) = overrides.api_base {
            self.upstream.api_base = base;
        }
        if let Some(key) = overrides.api_key {
            self.upstream.api_key = ApiKey::new(key);
        }
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.upstream.timeout_secs = secs;
        }
        if let Some(max) = overrides.max_sessions {
            self.limits.max_sessions = max;
        }
        if let Some(model) = overrides.default_model {
            self.upstream.default_model = Some(model);
        }
    }

    /// Validate the configuration; the gateway refuses to start otherwise
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        if self.limits.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
