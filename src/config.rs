use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::{DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_MARGIN};
use crate::serving::{self, DEFAULT_BASE_URL, MAX_PAGE_LIMIT};

const DEFAULT_ENV_PREFIX: &str = "PINFEED";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config: feed.page_size must be between 1 and {max}, got {value}")]
    PageSize { value: usize, max: usize },
    #[error("config: serving.base_url {0:?} is not a usable URL")]
    BaseUrl(String),
    #[error("config: serving.user_agent is required")]
    UserAgent,
    #[error("config: {0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("pinfeed/{}", crate::VERSION)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pixels from the bottom at which the next page is requested.
    #[serde(default = "default_prefetch_margin")]
    pub prefetch_margin: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            prefetch_margin: default_prefetch_margin(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_prefetch_margin() -> u32 {
    DEFAULT_PREFETCH_MARGIN
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_media_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: default_media_timeout(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_media_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("pinfeed").join("pinfeed.log"))
}

fn default_log_filter() -> String {
    "info".into()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.page_size == 0 || self.feed.page_size > MAX_PAGE_LIMIT {
            return Err(ConfigError::PageSize {
                value: self.feed.page_size,
                max: MAX_PAGE_LIMIT,
            });
        }
        if serving::parse_base_url(&self.serving.base_url).is_err() {
            return Err(ConfigError::BaseUrl(self.serving.base_url.clone()));
        }
        if self.serving.user_agent.trim().is_empty() {
            return Err(ConfigError::UserAgent);
        }
        if self.serving.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("serving.timeout"));
        }
        if self.media.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("media.timeout"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        // An explicitly named file must exist.
        let from_file = read_config_file(path)?;
        cfg = merge_config(cfg, from_file);
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = apply_env(cfg, prefix);

    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.serving.base_url.is_empty() {
        base.serving.base_url = other.serving.base_url;
    }
    if !other.serving.user_agent.is_empty() {
        base.serving.user_agent = other.serving.user_agent;
    }
    if !other.serving.timeout.is_zero() {
        base.serving.timeout = other.serving.timeout;
    }

    base.feed.page_size = other.feed.page_size;
    base.feed.prefetch_margin = other.feed.prefetch_margin;

    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    if !other.media.timeout.is_zero() {
        base.media.timeout = other.media.timeout;
    }
    if other.media.max_image_bytes != 0 {
        base.media.max_image_bytes = other.media.max_image_bytes;
    }

    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }
    if !other.log.filter.is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn apply_env(mut cfg: Config, prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "serving.base_url" => cfg.serving.base_url = value,
        "serving.user_agent" => cfg.serving.user_agent = value,
        "serving.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.serving.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.prefetch_margin" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.prefetch_margin = parsed;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.timeout = duration;
            }
        }
        "media.max_image_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.media.max_image_bytes = parsed;
            }
        }
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        "log.filter" => cfg.log.filter = value,
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pinfeed").join("config.yaml"))
}
