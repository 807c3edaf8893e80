//! API key storage.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".streetview-dl";
const CONFIG_FILE: &str = "config.json";

/// Contents of the configuration file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Stored Maps API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ConfigFile {
    /// Reads the file at `path`. A missing or unreadable file is treated as empty.
    pub fn load(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Ignoring malformed config file {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Writes the file, creating its directory if needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Default location of the configuration file, `~/.streetview-dl/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Plausibility check of a Maps API key.
pub fn is_valid_api_key(key: &str) -> bool {
    key.len() >= 30 && key.starts_with("AIza")
}

/// Shortened key for display.
pub fn mask_api_key(key: &str) -> String {
    if key.len() < 12 || !key.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &key[..8], &key[key.len() - 4..])
}

/// Picks the API key: the command line (or its environment variable) first, then the
/// configuration file.
pub fn resolve_api_key(cli: Option<&str>, config_path: Option<&Path>) -> anyhow::Result<String> {
    let key = match cli.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => key.to_string(),
        None => {
            let stored = config_path
                .map(ConfigFile::load)
                .and_then(|config| config.api_key)
                .filter(|key| !key.trim().is_empty());
            match stored {
                Some(key) => {
                    log::debug!("Using API key from the configuration file");
                    key.trim().to_string()
                }
                None => bail!(
                    "no API key given: pass --api-key, set GOOGLE_MAPS_API_KEY or run with \
                     --configure"
                ),
            }
        }
    };

    if !is_valid_api_key(&key) {
        bail!("invalid API key format: expected at least 30 characters starting with 'AIza'");
    }
    Ok(key)
}

/// Reads a key from `input` and stores it in the configuration file at `path`.
pub fn configure(path: &Path, mut input: impl BufRead) -> anyhow::Result<String> {
    let mut config = ConfigFile::load(path);
    if let Some(current) = &config.api_key {
        log::info!("Replacing stored API key {}", mask_api_key(current));
    }

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read the API key")?;
    let key = line.trim();
    if !is_valid_api_key(key) {
        bail!("invalid API key format: expected at least 30 characters starting with 'AIza'");
    }

    config.api_key = Some(key.to_string());
    config.save(path)?;
    Ok(key.to_string())
}
