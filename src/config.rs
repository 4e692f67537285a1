//! Configuration types for Reel

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::{ReelError, Result};

/// Default path of the stop-recording control endpoint
pub const DEFAULT_CONTROL_PATH: &str = "/vcr/stop";

/// Operating mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: forward to the origin and append to the cassette
    Record,
    /// Replay mode: serve from the cassette only
    Replay,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Operating mode, fixed for the session
    pub mode: Mode,
    /// Cassette file to write (record) or read (replay)
    pub cassette: PathBuf,
    /// Address the proxy listens on
    pub listen: String,
    /// Base URL of the remote origin, required in record mode
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Path that stops the active recorder
    #[serde(default = "default_control_path")]
    pub control_path: String,
    /// Outbound request settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Matching settings
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Response propagation settings
    #[serde(default)]
    pub response: ResponseConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_control_path() -> String {
    DEFAULT_CONTROL_PATH.to_string()
}

/// Settings for requests sent to the remote origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Whole round-trip timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Inbound headers copied onto the outbound request (case-insensitive)
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
    /// Forward the buffered inbound body
    #[serde(default = "default_true")]
    pub forward_body: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_forward_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "content-type".to_string(),
        "accept".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            forward_headers: default_forward_headers(),
            forward_body: true,
        }
    }
}

/// Request matching strategy used during replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparatorKind {
    /// Next unconsumed interaction, regardless of content
    #[default]
    Sequential,
    /// Method and URI equality
    MethodUri,
    /// Method, URI and selected header equality
    HeaderSubset,
    /// Method, URI and body equality
    Body,
    /// Canonical request fingerprint equality
    Fingerprint,
}

/// Replay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Matching strategy
    #[serde(default)]
    pub comparator: ComparatorKind,
    /// Header names consulted by header-aware strategies
    #[serde(default)]
    pub match_headers: Vec<String>,
    /// Only the next unconsumed interaction is a candidate; the strategy
    /// must still accept it
    #[serde(default)]
    pub in_order: bool,
}

/// How much of the recorded/fetched header set reaches the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPropagation {
    /// Status, `Content-Type` and body only
    #[default]
    Minimal,
    /// Every header except hop-by-hop framing headers
    Full,
}

/// Response configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Header propagation policy
    #[serde(default)]
    pub headers: HeaderPropagation,
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
        }
    }
}

impl Config {
    /// Build a configuration with defaults for everything but the essentials
    #[must_use]
    pub fn new(mode: Mode, cassette: impl Into<PathBuf>, listen: impl Into<String>) -> Self {
        Self {
            mode,
            cassette: cassette.into(),
            listen: listen.into(),
            remote_url: None,
            control_path: default_control_path(),
            upstream: UpstreamConfig::default(),
            replay: ReplayConfig::default(),
            response: ResponseConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReelError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ReelError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Listen address as a socket address
    ///
    /// # Errors
    ///
    /// Returns error if `listen` is not `host:port`
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            ReelError::ConfigError(format!("Invalid listen address '{}': {e}", self.listen))
        })
    }

    /// Remote origin base URL without a trailing slash
    #[must_use]
    pub fn remote_base(&self) -> Option<&str> {
        self.remote_url.as_deref().map(|url| url.trim_end_matches('/'))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.cassette.as_os_str().is_empty() {
            return Err(ReelError::ConfigError(
                "cassette path cannot be empty".to_string(),
            ));
        }

        self.listen_addr()?;

        if !self.control_path.starts_with('/') {
            return Err(ReelError::ConfigError(format!(
                "control_path must start with '/': {}",
                self.control_path
            )));
        }

        if self.mode == Mode::Record {
            match self.remote_base() {
                None | Some("") => {
                    return Err(ReelError::ConfigError(
                        "remote_url is required in record mode".to_string(),
                    ));
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    return Err(ReelError::ConfigError(format!(
                        "remote_url must be an http or https URL: {url}"
                    )));
                }
                Some(_) => {}
            }
        }

        if self.upstream.timeout_ms == 0 {
            return Err(ReelError::ConfigError(
                "upstream.timeout_ms must be > 0".to_string(),
            ));
        }

        let limits = [
            ("max_connections", self.limits.max_connections),
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
            ("max_headers", self.limits.max_headers),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ReelError::ConfigError(format!("limits.{name} must be > 0")));
            }
        }

        Ok(())
    }
}
