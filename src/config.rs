use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::ArchiveMonth;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base URL of the remote archive's CGI endpoint.
    #[serde(default = "default_archive_url")]
    pub archive_url: String,

    /// Earliest month (`yyyy-mm`) the archive has any content for. Months
    /// before this are never requested.
    #[serde(default = "default_epoch_month")]
    pub epoch_month: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// How many months of unbookmarked entries `--cleanup --drop-old` keeps.
    #[serde(default = "default_keep_months")]
    pub keep_months: u32,

    /// Read by the external background scheduler, not by backscroll itself.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backscroll");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("entries.db").to_string_lossy().to_string()
}

fn default_archive_url() -> String {
    "https://blog.example.net/archive.cgi".to_string()
}

fn default_epoch_month() -> String {
    "2000-01".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_keep_months() -> u32 {
    6
}

fn default_refresh_interval() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            archive_url: default_archive_url(),
            epoch_month: default_epoch_month(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            keep_months: default_keep_months(),
            refresh_interval_minutes: default_refresh_interval(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("backscroll")
            .join("config.toml")
    }

    pub fn epoch(&self) -> Result<ArchiveMonth> {
        ArchiveMonth::parse(&self.epoch_month)
            .ok_or_else(|| AppError::Config(format!("invalid epoch_month {:?}", self.epoch_month)))
    }
}
