//! Configuration management for Xcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub platform: PlatformConfig,
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Settings for the X API client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,
    /// Per-request timeout for refresh and publish calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Settings for the dispatch pass and its trigger endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Shared secret required by the dispatch trigger endpoint
    pub api_key: String,
    /// Window around "now" that absorbs trigger jitter
    #[serde(default = "default_tolerance_minutes")]
    pub tolerance_minutes: i64,
    /// Posts stop being auto-selected once attempt_count reaches this cap
    #[serde(default = "default_max_post_attempts")]
    pub max_post_attempts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_api_base_url() -> String {
    "https://api.x.com".to_string()
}

fn default_auth_base_url() -> String {
    "https://api.x.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_tolerance_minutes() -> i64 {
    2
}

fn default_max_post_attempts() -> i64 {
    5
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("XCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("xcast").join("config.toml"))
}
