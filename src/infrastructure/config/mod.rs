//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Host configuration. Also handed to every plugin handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Free-form settings plugins may read
    #[serde(default)]
    pub plugin_settings: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginConfig {
    pub directory: PathBuf,
    /// Sibling directory holding excluded plugin files
    #[serde(default = "default_disabled_dir")]
    pub disabled_dir_name: String,
    pub auto_load: bool,
    /// Where native libraries are copied before being opened
    #[serde(default)]
    pub scratch_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    pub timezone: String,
    pub quarantine_threshold: u32,
    pub stuck_threshold_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatchConfig {
    pub slow_threshold_ms: u64,
    pub disable_threshold: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub cascade_interval_secs: u64,
    pub error_rate_threshold: f64,
    pub slow_average_ms: u64,
    pub critical_streak: u32,
    pub cascade_critical_count: usize,
}

fn default_disabled_dir() -> String {
    "disabled".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: "Africa/Lagos".to_string(),
            quarantine_threshold: 5,
            stuck_threshold_secs: 2 * 60 * 60,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 2_000,
            disable_threshold: 15,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10 * 60,
            cascade_interval_secs: 60 * 60,
            error_rate_threshold: 0.20,
            slow_average_ms: 5_000,
            critical_streak: 3,
            cascade_critical_count: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "plugin-host".to_string(),
                prefix: ".".to_string(),
            },
            plugins: PluginConfig {
                directory: PathBuf::from("./plugins"),
                disabled_dir_name: default_disabled_dir(),
                auto_load: true,
                scratch_directory: None,
            },
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace_secs: default_shutdown_grace(),
            plugin_settings: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            self.bot.prefix = prefix;
        }

        if let Ok(dir) = std::env::var("BOT_PLUGINS_DIR") {
            self.plugins.directory = PathBuf::from(dir);
        }

        if let Ok(tz) = std::env::var("BOT_TIMEZONE") {
            self.scheduler.timezone = tz;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        chrono_tz::Tz::from_str(&self.scheduler.timezone)
            .map_err(|_| ConfigError::InvalidValue(format!("unknown timezone '{}'", self.scheduler.timezone)))?;

        if self.plugins.disabled_dir_name.is_empty() {
            return Err(ConfigError::MissingField("plugins.disabled-dir-name".to_string()));
        }
        if self.health.interval_secs == 0 || self.health.cascade_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("health intervals must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.health.error_rate_threshold) {
            return Err(ConfigError::InvalidValue("health.error-rate-threshold must be within 0..=1".to_string()));
        }
        Ok(())
    }

    pub fn disabled_directory(&self) -> PathBuf {
        self.plugins.directory.join(&self.plugins.disabled_dir_name)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
