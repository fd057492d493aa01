use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest accepted refresh interval in minutes (one year).
pub const MAX_REFRESH_INTERVAL: u64 = 60 * 24 * 365;

/// Whether `minutes` is a usable refresh interval.
pub fn is_valid_refresh_interval(minutes: u64) -> bool {
    (1..=MAX_REFRESH_INTERVAL).contains(&minutes)
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root directory holding one subdirectory per source
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Default refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_refresh_interval() -> u64 {
    15
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub title: String,
    pub url: String,
    /// Overrides the default refresh interval when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u64>,
}

impl SourceConfig {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            refresh_interval: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            refresh_interval: default_refresh_interval(),
            sources: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_refresh_interval(self.refresh_interval) {
            bail!(
                "refresh_interval must be between 1 and {} minutes, got {}",
                MAX_REFRESH_INTERVAL,
                self.refresh_interval
            );
        }
        for source in &self.sources {
            if let Some(minutes) = source.refresh_interval {
                if !is_valid_refresh_interval(minutes) {
                    bail!(
                        "refresh_interval of source '{}' must be between 1 and {} minutes, got {}",
                        source.title,
                        MAX_REFRESH_INTERVAL,
                        minutes
                    );
                }
            }
        }
        Ok(())
    }

    /// Write the config back, replacing the file through a temporary sibling.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
