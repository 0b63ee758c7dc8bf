use crate::error::ConfigError;
use crate::persistence::ConflictPolicy;
use crate::sink::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Coingecko,
    Birdeye,
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Coingecko => f.write_str("coingecko"),
            SourceKind::Birdeye => f.write_str("birdeye"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    fn with_url(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            api_key: None,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

const NETWORK_MAX_CHARS: usize = 20;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub network: String,
    pub source: SourceKind,
    pub target_count: usize,
    pub max_pages: u32,
    pub batch_size: usize,
    pub conflict_policy: ConflictPolicy,
    pub request_interval_ms: u64,
    pub http_timeout_sec: u64,
    pub run_timeout_sec: u64,
    pub report_top: usize,
    pub pool_size: u32,
    pub retry: RetryConfig,
    pub coingecko: ProviderConfig,
    pub birdeye: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            network: "BSC".to_string(),
            source: SourceKind::Coingecko,
            target_count: 500,
            max_pages: 20,
            batch_size: DEFAULT_BATCH_SIZE,
            conflict_policy: ConflictPolicy::Update,
            request_interval_ms: 1_200,
            http_timeout_sec: 30,
            run_timeout_sec: 1_800,
            report_top: 10,
            pool_size: 4,
            retry: RetryConfig::default(),
            coingecko: ProviderConfig::with_url("https://api.coingecko.com"),
            birdeye: ProviderConfig::with_url("https://public-api.birdeye.so"),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let toml_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&toml_str).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(key) = lookup("COINGECKO_API_KEY") {
            self.coingecko.api_key = Some(key);
        }
        if let Some(key) = lookup("BIRDEYE_API_KEY") {
            self.birdeye.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let network_len = self.network.chars().count();
        if network_len == 0 || network_len > NETWORK_MAX_CHARS {
            return Err(ConfigError::Invalid {
                field: "network",
                reason: format!("expected 1 to {NETWORK_MAX_CHARS} characters, got {network_len}"),
            });
        }
        Ok(())
    }

    pub fn source_enabled(&self, kind: SourceKind) -> Result<(), ConfigError> {
        match kind {
            SourceKind::Coingecko => Ok(()),
            SourceKind::Birdeye => self
                .birdeye
                .api_key()
                .map(|_| ())
                .ok_or(ConfigError::Missing("BIRDEYE_API_KEY")),
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_sec)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_sec)
    }
}
