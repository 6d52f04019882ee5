//! Application configuration management.
//!
//! This module holds the fixed cache generation tag and core file list, and
//! loads the host configuration (scope URL, cache directory, timeouts).
//!
//! Configuration is stored at `~/.config/parkwecker/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::network::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "parkwecker";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured scope
pub const SCOPE_ENV: &str = "PARKWECKER_SCOPE";

/// Current cache generation. Bumping it invalidates every older generation.
pub const CACHE_NAME: &str = "parkwecker-v10";

/// Resources required for the app shell to work offline, relative to the scope.
pub const CORE_FILES: [&str; 5] = [
    "./",
    "./index.html",
    "./manifest.json",
    "./icon-192.png",
    "./icon-512.png",
];

/// Relative path of the application shell root; all navigations share its entry.
pub const SHELL_PATH: &str = "./";

const DEFAULT_SCOPE: &str = "http://localhost:8080/";

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_cache_name() -> String {
    CACHE_NAME.to_string()
}

fn default_core_files() -> Vec<String> {
    CORE_FILES.iter().map(|s| s.to_string()).collect()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    #[serde(default = "default_core_files")]
    pub core_files: Vec<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            cache_name: default_cache_name(),
            core_files: default_core_files(),
            request_timeout_secs: default_timeout(),
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        if let Ok(scope) = std::env::var(SCOPE_ENV) {
            config.scope = scope;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Scope as an absolute URL. A trailing slash is added so relative core
    /// file paths resolve inside the scope rather than next to it.
    pub fn scope_url(&self) -> Result<Url> {
        let mut scope = self.scope.clone();
        if !scope.ends_with('/') {
            scope.push('/');
        }
        Url::parse(&scope).with_context(|| format!("Invalid scope URL: {}", self.scope))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
