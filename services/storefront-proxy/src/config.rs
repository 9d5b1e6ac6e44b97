//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `STOREFRONT_API_BASE` and `STOREFRONT_COOKIE_SECURE` override the file so
//! the same TOML can be shipped to every environment.

use backend_auth::DEFAULT_API_BASE;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const API_BASE_ENV: &str = "STOREFRONT_API_BASE";
const COOKIE_SECURE_ENV: &str = "STOREFRONT_COOKIE_SECURE";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Backend API settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Base URL every proxied path is appended to
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Per-call timeout for every outbound request, refresh included
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session cookie attributes
#[derive(Debug, Default, Deserialize)]
pub struct CookieConfig {
    #[serde(default)]
    pub secure: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(api_base) = std::env::var(API_BASE_ENV) {
            config.backend.api_base = api_base;
        }
        if let Ok(secure) = std::env::var(COOKIE_SECURE_ENV) {
            config.cookies.secure = parse_bool(COOKIE_SECURE_ENV, &secure)?;
        }

        config.backend.api_base = config.backend.api_base.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let api_base = &self.backend.api_base;
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "api_base must start with http:// or https://, got: {api_base}"
            )));
        }

        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storefront-proxy.toml")
    }
}

fn parse_bool(var: &'static str, value: &str) -> common::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(common::Error::Env {
            var,
            value: value.to_string(),
        }),
    }
}
