use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};

/// Optional settings read from `config.yaml`. Every key may be omitted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    #[serde(alias = "gemini_path")]
    pub command: Option<String>,
    pub ntfy_topic: Option<String>,
    pub ntfy_server: Option<String>,
    /// Duration string such as `30s` or `1m30s`.
    pub backstop_timeout: Option<String>,
    pub quiet: Option<bool>,
    #[serde(alias = "default_gemini_args")]
    pub default_args: Vec<String>,
    /// Accepted for older config files and ignored; no startup notification
    /// is ever sent.
    pub startup_notify: Option<bool>,
}

impl FileConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("invalid config YAML")
    }

    /// Read `path`. A missing file yields the empty config; anything else
    /// that goes wrong is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text)
                .with_context(|| format!("failed to load config file {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file");
                Ok(Self::default())
            }
            Err(err) => Err(err)
                .with_context(|| format!("failed to read config file {}", path.display())),
        }
    }
}

/// `$XDG_CONFIG_HOME/cli-ntfy/config.yaml`, else `~/.config/cli-ntfy/config.yaml`.
pub fn default_config_path(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let base = match xdg_config_home.filter(|value| !value.is_empty()) {
        Some(xdg) => PathBuf::from(xdg),
        None => PathBuf::from(home.filter(|value| !value.is_empty())?).join(".config"),
    };
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
