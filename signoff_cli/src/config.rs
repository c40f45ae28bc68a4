use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use signoff_db::EngineConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,
    pub attachments_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Get (~/.signoff)
    pub fn signoff_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".signoff"))
    }

    pub fn default_db_path() -> Result<PathBuf> {
        Ok(Self::signoff_dir()?.join("signoff.db"))
    }

    pub fn default_attachments_dir() -> Result<PathBuf> {
        Ok(Self::signoff_dir()?.join("attachments"))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::signoff_dir()?.join("config.json"))
    }

    pub fn default_config() -> Result<Self> {
        Ok(Config {
            db_path: Self::default_db_path()?,
            attachments_dir: Self::default_attachments_dir()?,
            engine: EngineConfig::default(),
        })
    }

    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::config_file()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Self::default_config()
        }
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path).context("Failed to read config file")?;
        serde_json::from_str(&content).context("Failed to parse config file")
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }
}
