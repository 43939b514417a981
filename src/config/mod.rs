//! Configuration management for portalsync.
//!
//! Configuration is read from `~/.config/portalsync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::DeviceIdentity;
use crate::fetcher::limiter::{IMAGE_DECODE_PERMITS, IMAGE_DOWNLOAD_PERMITS, NETWORK_PERMITS};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Unknown; Linux) AppleWebKit/538.1 (KHTML, like Gecko) MAG322 stbapp ver: 5 rev: 230 Mobile Safari/538.1";

/// Categories indexed regardless of user selection.
pub const DEFAULT_INDEXED_CATEGORIES: &[&str] = &[
    "5", "6", "63", "1", "75", "2", "3", "82", "8", "65", "12", "77", "13", "15", "45",
];

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub portal: PortalConfig,
    pub index: IndexConfig,
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub url: String,
    pub mac: String,
    pub serial_number: Option<String>,
    pub device_id: Option<String>,
    pub device_id2: Option<String>,
    pub signature: Option<String>,
    pub user_agent: String,
    pub timezone: String,
    pub timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost".to_string(),
            mac: "00:1A:79:00:00:00".to_string(),
            serial_number: None,
            device_id: None,
            device_id2: None,
            signature: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timezone: "Europe/Kiev".to_string(),
            timeout_secs: 60,
        }
    }
}

impl PortalConfig {
    /// Identity derived from the MAC, with any explicitly configured values
    /// taking precedence.
    pub fn identity(&self) -> DeviceIdentity {
        let mut identity = DeviceIdentity::derive(&self.mac);
        if let Some(sn) = &self.serial_number {
            identity.serial_number = sn.clone();
        }
        if let Some(id) = &self.device_id {
            identity.device_id = id.clone();
        }
        if let Some(id) = &self.device_id2 {
            identity.device_id2 = id.clone();
        }
        if let Some(sig) = &self.signature {
            identity.signature = sig.clone();
        }
        identity
    }

    /// Set-top box model advertised in `X-User-Agent`.
    pub fn model(&self) -> &'static str {
        if self.user_agent.contains("MAG324") {
            "MAG324"
        } else if self.user_agent.contains("MAG322") {
            "MAG322"
        } else {
            "MAG200"
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub default_categories: Vec<String>,
    pub additional_categories: Vec<String>,
    pub per_page: u32,
    pub page_delay_ms: u64,
    pub activity_window_secs: u64,
    pub activity_backoff_secs: u64,
    pub staleness_hours: i64,
    pub hybrid_pages: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            default_categories: DEFAULT_INDEXED_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            additional_categories: Vec::new(),
            per_page: 14,
            page_delay_ms: 200,
            activity_window_secs: 5,
            activity_backoff_secs: 10,
            staleness_hours: 24,
            hybrid_pages: 2,
        }
    }
}

impl IndexConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }

    pub fn activity_backoff(&self) -> Duration {
        Duration::from_secs(self.activity_backoff_secs)
    }

    /// Negative values mean always stale; values past chrono's range
    /// saturate to never stale.
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.staleness_hours.max(0)).unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub network: usize,
    pub image_download: usize,
    pub image_decode: usize,
    pub image_bytes_capacity: usize,
    pub image_bitmap_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            network: NETWORK_PERMITS,
            image_download: IMAGE_DOWNLOAD_PERMITS,
            image_decode: IMAGE_DECODE_PERMITS,
            image_bytes_capacity: 256,
            image_bitmap_capacity: 512,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Cache directory: configured, else `<cache dir>/portalsync`.
    pub fn resolve_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .ok_or(ConfigError::NoConfigDir)?
                .join("portalsync")),
        }
    }
}

/// Source of the category IDs the indexer should cover.
///
/// The default set is fixed; the additional set belongs to the user's
/// preferences and may change between runs.
pub trait CategorySelection: Send + Sync {
    fn default_categories(&self) -> BTreeSet<String>;
    fn additional_categories(&self) -> BTreeSet<String>;
}

impl CategorySelection for IndexConfig {
    fn default_categories(&self) -> BTreeSet<String> {
        self.default_categories.iter().cloned().collect()
    }

    fn additional_categories(&self) -> BTreeSet<String> {
        self.additional_categories.iter().cloned().collect()
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/portalsync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("portalsync").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# portalsync configuration

[portal]
# Portal address. The API path prefix is discovered automatically.
url = "http://localhost"
mac = "00:1A:79:00:00:00"

# Device identity. When omitted these are derived from the MAC.
# serial_number = "..."
# device_id = "..."
# device_id2 = "..."
# signature = "..."

user_agent = "Mozilla/5.0 (Unknown; Linux) AppleWebKit/538.1 (KHTML, like Gecko) MAG322 stbapp ver: 5 rev: 230 Mobile Safari/538.1"
timezone = "Europe/Kiev"
timeout_secs = 60

[index]
# Always indexed
default_categories = ["5", "6", "63", "1", "75", "2", "3", "82", "8", "65", "12", "77", "13", "15", "45"]
# Extra categories picked by the user
additional_categories = []

per_page = 14
# Pause between pages of a background run
page_delay_ms = 200
# Back off when a foreground read happened within this window
activity_window_secs = 5
activity_backoff_secs = 10
# A completed index younger than this is considered fresh
staleness_hours = 24
# Pages fetched live when serving a stale category
hybrid_pages = 2

[limits]
network = 4
image_download = 20
image_decode = 4
image_bytes_capacity = 256
image_bitmap_capacity = 512

[cache]
# dir = "/var/cache/portalsync"
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
