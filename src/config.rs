use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::notifier::socketio::{SOCKET_IO_PATH, WEBSOCKET_QUERY};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Live-update endpoint. Derived from `api_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_credentials_path() -> PathBuf {
    Config::warden_dir().join("credentials")
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// initial delay and never exceeds the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
            request_timeout_seconds: default_request_timeout_seconds(),
            credentials_path: default_credentials_path(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&config_path, contents)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        std::env::var("WARDEN_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::warden_dir().join("config.toml"))
    }

    pub fn warden_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden")
    }

    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn live_update_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }

        let base = self.api_base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        format!("{}{}?{}", ws_base, SOCKET_IO_PATH, WEBSOCKET_QUERY)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WARDEN_API_URL") {
            self.api_url = val;
        }

        if let Ok(val) = std::env::var("WARDEN_WS_URL") {
            self.ws_url = Some(val);
        }

        if let Ok(val) = std::env::var("WARDEN_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(seconds) = val.parse() {
                self.request_timeout_seconds = seconds;
            }
        }

        if let Ok(path) = std::env::var("WARDEN_CREDENTIALS_PATH") {
            self.credentials_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("WARDEN_RECONNECT_DELAY_MS") {
            if let Ok(millis) = val.parse() {
                self.reconnect.initial_delay_ms = millis;
            }
        }

        if let Ok(val) = std::env::var("WARDEN_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.reconnect.max_attempts = attempts;
            }
        }
    }
}

pub async fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn init_config() -> Result<()> {
    let config_path = Config::config_path();

    if config_path.exists() {
        anyhow::bail!("Config file already exists at: {}", config_path.display());
    }

    let config = Config::default();
    config.save()?;

    println!("Initialized config at: {}", config_path.display());
    Ok(())
}
