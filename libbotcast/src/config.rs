//! Configuration management for botcast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backends::BackendKind;
use crate::error::{ConfigError, Result};

/// File whose presence marks the historical birdsite credentials layout
const LEGACY_BIRDSITE_MARKER: &str = "CONSUMER_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot: BotSection,
    #[serde(default)]
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Directory holding per-backend credentials and, by default, the history
    #[serde(default)]
    pub secrets_dir: Option<String>,
    #[serde(default)]
    pub history_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_bot_name() -> String {
    "A bot".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BotConfig {
    /// Create a configuration for a bot keeping its secrets in `secrets_dir`
    pub fn new(secrets_dir: impl Into<String>) -> Self {
        Self {
            bot: BotSection {
                name: default_bot_name(),
                secrets_dir: Some(secrets_dir.into()),
                history_file: None,
            },
            logging: LogSettings::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.bot.name = name.into();
        self
    }

    pub fn with_history_file(mut self, path: impl Into<String>) -> Self {
        self.bot.history_file = Some(path.into());
        self
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: BotConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the bot has somewhere to keep its state
    pub fn validate(&self) -> Result<()> {
        match self.bot.secrets_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingField("bot.secrets_dir".to_string()).into()),
        }
    }

    /// Secrets directory with `~` expanded
    pub fn secrets_dir(&self) -> Result<PathBuf> {
        self.validate()?;
        let dir = self.bot.secrets_dir.as_deref().unwrap_or_default();
        Ok(expand_path(dir))
    }

    /// Path of the history file
    ///
    /// Defaults to `<secrets_dir>/<name>-history.json`.
    pub fn history_path(&self) -> Result<PathBuf> {
        if let Some(file) = self.bot.history_file.as_deref() {
            if !file.trim().is_empty() {
                return Ok(expand_path(file));
            }
        }
        Ok(self.secrets_dir()?.join(format!("{}-history.json", self.bot.name)))
    }

    /// Directory holding the credentials of `kind`, if it was provisioned
    ///
    /// Birdsite credentials may also live directly in the secrets directory.
    pub fn credentials_dir(&self, kind: BackendKind) -> Option<PathBuf> {
        let secrets_dir = self.secrets_dir().ok()?;

        let dedicated = secrets_dir.join(format!("credentials_{}", kind.name()));
        if dedicated.is_dir() {
            return Some(dedicated);
        }
        if kind == BackendKind::Birdsite && secrets_dir.join(LEGACY_BIRDSITE_MARKER).is_file() {
            return Some(secrets_dir);
        }
        None
    }

    /// Backends with credentials on disk, in name order
    pub fn provisioned_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.credentials_dir(*kind).is_some())
            .collect()
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("BOTCAST_CONFIG") {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("botcast").join("config.toml"))
}
