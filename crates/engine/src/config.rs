//! Engine configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// User notification behavior for hotplug alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Emit alerts on hotplug events
    #[serde(default = "NotificationSettings::default_enabled")]
    pub enabled: bool,
    /// Cooldown window between alerts, in seconds
    #[serde(default = "NotificationSettings::default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Disable the cooldown entirely (every event alerts)
    #[serde(default)]
    pub disable_cooldown: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            cooldown_secs: Self::default_cooldown_secs(),
            disable_cooldown: false,
        }
    }
}

impl NotificationSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_cooldown_secs() -> u64 {
        3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "LogSettings::default_level")]
    pub level: String,
    /// How many connection events to retain
    #[serde(default = "LogSettings::default_retained_events")]
    pub retained_events: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            retained_events: Self::default_retained_events(),
        }
    }
}

impl LogSettings {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_retained_events() -> usize {
        100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSettings {
    /// Directory for the persisted overlay relations.
    /// Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolve the overlay data directory.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("usb-sentry")
        } else {
            PathBuf::from(".usb-sentry")
        }
    }
}

impl EngineConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-sentry/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-sentry").join("config.toml")
        } else {
            PathBuf::from(".config/usb-sentry/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        if self.log.retained_events == 0 {
            return Err(anyhow!("log.retained_events must be at least 1"));
        }

        if !self.notifications.disable_cooldown && self.notifications.cooldown_secs == 0 {
            return Err(anyhow!(
                "notifications.cooldown_secs must be at least 1 unless the cooldown is disabled"
            ));
        }

        Ok(())
    }
}
