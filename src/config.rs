//! Persistent configuration, stored at `~/.redlens/config.toml`.
//!
//! Every field is optional; command-line flags and environment variables
//! take precedence over the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tavily_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Path of the JSON session store.
    pub store_path: Option<PathBuf>,
    /// Server the REPL connects to.
    pub server_url: Option<String>,
}

impl Config {
    fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".redlens"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the config file, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Store path: configured value or `~/.redlens/chats.json`.
    pub fn store_path_or_default(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("chats.json")),
        }
    }
}
