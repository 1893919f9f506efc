//! Layered configuration
//!
//! Built-in defaults, then an optional TOML/JSON file, then `AUTOCAT__SECTION__KEY` environment
//! variables. The merged result is validated before anything else starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix, e.g. `AUTOCAT__MEDIA__WORKERS=8`.
pub const ENV_PREFIX: &str = "AUTOCAT";
const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Default values
pub mod defaults {
    pub const DATABASE_FILE: &str = "autocat.sqlite3";
    pub const MAX_CONNECTIONS: u32 = 8;
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;

    pub const TREE_MENU_URL: &str =
        "https://www.autohome.com.cn/web-main/car/web/price/treeMenu?extendseries=1";
    pub const PARAM_CONF_URL: &str =
        "https://www.autohome.com.cn/web-main/car/param/getParamConf?mode=1&site=1&seriesid={series_id}";
    pub const PHOTO_INFO_URL: &str =
        "https://www.autohome.com.cn/web-main/car/pic/getSeriesBasePicInfo?seriesid={series_id}";
    pub const PHOTO_LIST_URL: &str = "https://www.autohome.com.cn/web-main/car/pic/getPicList?seriesid={series_id}&specid={spec_id}&categoryid={category_id}&colorid={color_id}&isinnercolor={is_interior}&pageindex=1&pagesize={page_size}";
    pub const PANORAMA_INFO_URL: &str = "https://pano.autohome.com.cn/api/ext/baseinfo/{ext_id}";
    pub const PANORAMA_FRAMES_URL: &str =
        "https://pano.autohome.com.cn/api/ext/getVrInfo?specid={spec_id}&colorid={color_id}";
    pub const PANORAMA_IMAGE_ROOT: &str = "//panovr.autoimg.cn/pano";
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 5;

    pub const MEDIA_DIR: &str = "media";
    pub const DOWNLOAD_WORKERS: usize = 4;
    pub const BACKPRESSURE_THRESHOLD: usize = 256;
    pub const DOWNLOAD_TIMEOUT_SECONDS: u64 = 60;

    pub const METADATA_CONCURRENCY: usize = 4;
    pub const PHOTO_PAGE_SIZE: u32 = 60;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
    pub const RETRY_MAX_DELAY_MS: u64 = 10_000;
    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const RETRY_JITTER_MS: u64 = 250;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 7;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub media: MediaConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://` URL of the entity store
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: format!(
                "sqlite://{}",
                data_dir().join(defaults::DATABASE_FILE).display()
            ),
            max_connections: defaults::MAX_CONNECTIONS,
            busy_timeout_ms: defaults::BUSY_TIMEOUT_MS,
        }
    }
}

/// Listing endpoints are URL templates with `{series_id}`-style placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub tree_menu_url: String,
    pub param_conf_url: String,
    pub photo_info_url: String,
    pub photo_list_url: String,
    pub panorama_info_url: String,
    pub panorama_frames_url: String,
    /// Prefix for relative frame URLs when the payload carries none
    pub panorama_image_root: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tree_menu_url: defaults::TREE_MENU_URL.to_string(),
            param_conf_url: defaults::PARAM_CONF_URL.to_string(),
            photo_info_url: defaults::PHOTO_INFO_URL.to_string(),
            photo_list_url: defaults::PHOTO_LIST_URL.to_string(),
            panorama_info_url: defaults::PANORAMA_INFO_URL.to_string(),
            panorama_frames_url: defaults::PANORAMA_FRAMES_URL.to_string(),
            panorama_image_root: defaults::PANORAMA_IMAGE_ROOT.to_string(),
            user_agent: defaults::USER_AGENT.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Root for all downloaded files; stored paths are relative to it
    pub root_dir: PathBuf,
    pub download_photos: bool,
    pub download_panoramas: bool,
    pub workers: usize,
    /// Queued downloads beyond which the producer waits
    pub backpressure_threshold: usize,
    pub download_timeout_seconds: u64,
    /// Treat a stored path as a cache hit only if the file is still on disk
    pub verify_on_disk: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root_dir: data_dir().join(defaults::MEDIA_DIR),
            download_photos: true,
            download_panoramas: true,
            workers: defaults::DOWNLOAD_WORKERS,
            backpressure_threshold: defaults::BACKPRESSURE_THRESHOLD,
            download_timeout_seconds: defaults::DOWNLOAD_TIMEOUT_SECONDS,
            verify_on_disk: true,
        }
    }
}

impl MediaConfig {
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Series walked concurrently within one brand
    pub metadata_concurrency: usize,
    /// Process only the first N brands of the tree, 0 for all
    pub brand_limit: usize,
    /// When false, series that already have specifications are not walked again
    pub force_resync: bool,
    pub sync_photos: bool,
    pub sync_panoramas: bool,
    pub photo_page_size: u32,
    /// Colors per palette used for photo listings, 0 for all
    pub max_colors: usize,
    /// Cap on (specification, color, category) listings per series, 0 for none
    pub max_photo_combinations: usize,
    /// Restrict photo listings to these category ids; empty for all
    pub photo_categories: Vec<i64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            metadata_concurrency: defaults::METADATA_CONCURRENCY,
            brand_limit: 0,
            force_resync: true,
            sync_photos: true,
            sync_panoramas: true,
            photo_page_size: defaults::PHOTO_PAGE_SIZE,
            max_colors: 0,
            max_photo_combinations: 0,
            photo_categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            jitter_ms: defaults::RETRY_JITTER_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub directory: PathBuf,
    /// Number of log files to keep (older files are deleted on startup)
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            directory: data_dir().join("logs"),
            max_files: defaults::LOG_MAX_FILES,
        }
    }
}

/// Per-user data directory, falling back to the working directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("autocat-sync"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AppConfig {
    /// Loads defaults, the optional file and the environment, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sync.photo_categories"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Validation {
                message: message.into(),
            })
        }

        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0");
        }
        if self.feed.max_requests_per_second == 0 {
            return invalid("feed.max_requests_per_second must be greater than 0");
        }
        if self.feed.timeout_seconds == 0 {
            return invalid("feed.timeout_seconds must be greater than 0");
        }
        if self.media.workers == 0 {
            return invalid("media.workers must be greater than 0");
        }
        if self.media.backpressure_threshold == 0 {
            return invalid("media.backpressure_threshold must be greater than 0");
        }
        if self.media.download_timeout_seconds == 0 {
            return invalid("media.download_timeout_seconds must be greater than 0");
        }
        if self.sync.metadata_concurrency == 0 {
            return invalid("sync.metadata_concurrency must be greater than 0");
        }
        if self.sync.photo_page_size == 0 {
            return invalid("sync.photo_page_size must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be greater than 0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms cannot be greater than retry.max_delay_ms");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }
        if !self.logging.console_output && !self.logging.file_output {
            return invalid("logging needs console_output or file_output");
        }

        Ok(())
    }
}
