use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::preference::CUSTOM_ENTRY_OVERHEAD;
use crate::upload::{max_data_url_len, DEFAULT_MAX_CUSTOM_BYTES};

const APP_DIR: &str = "calltone";

/// Configuration for calltone loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Option<String>,
    pub store_path: PathBuf,
    pub dedup_retention_seconds: u64,
    pub max_custom_bytes: usize,
    pub storage_quota_bytes: usize,
    pub fetch_timeout_seconds: u64,
    pub volume: f32,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            store_path: default_store_path(),
            dedup_retention_seconds: 30,
            max_custom_bytes: DEFAULT_MAX_CUSTOM_BYTES,
            storage_quota_bytes: 5 * 1024 * 1024,
            fetch_timeout_seconds: 10,
            volume: 1.0,
            rust_log: "info".to_string(),
        }
    }
}

/// Default path for the env file: `~/.config/calltone/.env`
pub fn default_envfile() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(".env")
}

/// Default preference file under the user's data directory
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("preferences.json")
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

impl Config {
    /// Load configuration from environment variables
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut config = Config::default();

        config.base_url = std::env::var("RING_BASE_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        if let Ok(path) = std::env::var("RING_STORE_PATH") {
            if !path.trim().is_empty() {
                config.store_path = PathBuf::from(path.trim());
            }
        }

        if let Some(seconds) = parse_var("RING_DEDUP_RETENTION_SECONDS") {
            config.dedup_retention_seconds = seconds;
        }

        if let Some(bytes) = parse_var("RING_MAX_CUSTOM_BYTES") {
            config.max_custom_bytes = bytes;
        }

        if let Some(bytes) = parse_var("RING_STORAGE_QUOTA_BYTES") {
            config.storage_quota_bytes = bytes;
        }

        if let Some(seconds) = parse_var("RING_FETCH_TIMEOUT_SECONDS") {
            config.fetch_timeout_seconds = seconds;
        }

        if let Some(volume) = parse_var::<f32>("RING_VOLUME") {
            if volume.is_finite() {
                config.volume = volume.clamp(0.0, 1.0);
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.rust_log = log_level;
        }

        config
    }

    /// Load environment file and return config
    pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::from_path(path)?;
        Ok(Self::from_env())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_none() {
            return Err(anyhow::anyhow!(
                "RING_BASE_URL is required to locate bundled sounds. Please set it in your .env file."
            ));
        }

        if self.dedup_retention_seconds == 0 {
            return Err(anyhow::anyhow!(
                "RING_DEDUP_RETENTION_SECONDS must be greater than 0"
            ));
        }

        if self.max_custom_bytes == 0 {
            return Err(anyhow::anyhow!("RING_MAX_CUSTOM_BYTES must be greater than 0"));
        }

        // Uploads are stored base64 encoded next to their keys
        let largest_entry = max_data_url_len(self.max_custom_bytes) + CUSTOM_ENTRY_OVERHEAD;
        if self.storage_quota_bytes < largest_entry {
            return Err(anyhow::anyhow!(
                "RING_STORAGE_QUOTA_BYTES ({}) cannot hold an upload of RING_MAX_CUSTOM_BYTES ({}), which needs {} bytes once encoded",
                self.storage_quota_bytes,
                self.max_custom_bytes,
                largest_entry
            ));
        }

        if !(0.0..=1.0).contains(&self.volume) {
            return Err(anyhow::anyhow!(
                "RING_VOLUME must be between 0.0 and 1.0, got: {}",
                self.volume
            ));
        }

        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_default()
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Load the env file when present, read the environment, and validate.
///
/// A missing env file is not an error; settings may come from the process
/// environment alone.
pub fn bootstrap(envfile: Option<&Path>) -> Result<Config> {
    let config = match envfile {
        Some(path) if path.exists() => Config::load_env_file(path)?,
        _ => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}
