use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
///
/// Resolved in three layers: built-in defaults, an optional TOML file, then
/// environment variables. Non-empty environment values always win.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    /// Upper bound applied to every `limit` query parameter.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Message listings only reach this far back. 0 disables the cut-off.
    #[serde(default = "default_max_hours")]
    pub max_hours: u64,
    #[serde(default)]
    pub phone_whitelist: Vec<String>,
    #[serde(default)]
    pub phone_blacklist: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            port: default_port(),
            bind_host: default_bind_host(),
            store_dir: default_store_dir(),
            max_messages: default_max_messages(),
            max_hours: default_max_hours(),
            phone_whitelist: Vec::new(),
            phone_blacklist: Vec::new(),
            log_level: default_log_level(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_store_dir() -> String {
    "/data/store".to_string()
}

fn default_max_messages() -> usize {
    100
}

fn default_max_hours() -> u64 {
    48
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.expand_paths();
        Ok(config)
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        toml::from_str(&content).with_context(|| "Failed to parse TOML config")
    }

    /// Apply environment overrides through `lookup`, so tests can inject
    /// variables without touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = var("PORT") {
            self.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = var("BIND_HOST") {
            self.bind_host = v;
        }
        if let Some(v) = var("STORE_DIR") {
            self.store_dir = v;
        }
        if let Some(v) = var("MAX_MESSAGES") {
            self.max_messages = parse_number("MAX_MESSAGES", &v)?;
        }
        if let Some(v) = var("MAX_HOURS") {
            self.max_hours = parse_number("MAX_HOURS", &v)?;
        }
        if let Some(v) = var("PHONE_WHITELIST") {
            self.phone_whitelist = split_and_trim(&v);
        }
        if let Some(v) = var("PHONE_BLACKLIST") {
            self.phone_blacklist = split_and_trim(&v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn expand_paths(&mut self) {
        self.store_dir = shellexpand::tilde(&self.store_dir).to_string();
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("API_KEY is required (set it in the environment or as api_key in the config file)");
        }

        if self.max_messages == 0 {
            anyhow::bail!("max_messages must be at least 1");
        }

        if self.bind_host.parse::<IpAddr>().is_err() {
            anyhow::bail!("Invalid bind host: {}", self.bind_host);
        }

        if self.store_dir.trim().is_empty() {
            anyhow::bail!("store_dir must not be empty");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        match self.bind_host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.bind_host, self.port),
            _ => format!("{}:{}", self.bind_host, self.port),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.store_dir).join("messages.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        PathBuf::from(&self.store_dir).join("media")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid {} value: {}", key, value))
}

/// Comma-separated list with whitespace trimmed and blank entries dropped.
fn split_and_trim(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
