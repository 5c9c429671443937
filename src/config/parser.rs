use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::voice::{MAX_DELETE_DELAY_SECONDS, MAX_USER_COOLDOWN_SECONDS};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub voice: VoiceDefaultsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub bot_token: String,
    #[serde(default = "default_use_privileged_intents")]
    pub use_privileged_intents: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            admin_token: None,
        }
    }
}

/// Process-wide fallbacks for the voice lifecycle subsystem. Per-guild values
/// live in the database; these apply when a guild row cannot be read.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceDefaultsConfig {
    #[serde(default = "default_delete_delay_seconds")]
    pub default_delete_delay_seconds: u32,
    #[serde(default = "default_user_cooldown_seconds")]
    pub default_user_cooldown_seconds: u32,
    #[serde(default = "default_max_creations_per_minute")]
    pub max_creations_per_minute: usize,
    #[serde(default = "default_config_cache_ttl_seconds")]
    pub config_cache_ttl_seconds: u64,
}

impl Default for VoiceDefaultsConfig {
    fn default() -> Self {
        Self {
            default_delete_delay_seconds: default_delete_delay_seconds(),
            default_user_cooldown_seconds: default_user_cooldown_seconds(),
            max_creations_per_minute: default_max_creations_per_minute(),
            config_cache_ttl_seconds: default_config_cache_ttl_seconds(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.voice.default_delete_delay_seconds > MAX_DELETE_DELAY_SECONDS {
            return Err(ConfigError::InvalidConfig(format!(
                "voice.default_delete_delay_seconds must be between 0 and {}",
                MAX_DELETE_DELAY_SECONDS
            )));
        }

        if self.voice.default_user_cooldown_seconds > MAX_USER_COOLDOWN_SECONDS {
            return Err(ConfigError::InvalidConfig(format!(
                "voice.default_user_cooldown_seconds must be between 0 and {}",
                MAX_USER_COOLDOWN_SECONDS
            )));
        }

        if self.voice.max_creations_per_minute == 0 {
            return Err(ConfigError::InvalidConfig(
                "voice.max_creations_per_minute must be at least 1".to_string(),
            ));
        }

        if self.voice.config_cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidConfig(
                "voice.config_cache_ttl_seconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("JTC_DISCORD_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
        if let Ok(value) = std::env::var("JTC_DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Ok(value) = std::env::var("JTC_WEB_ADMIN_TOKEN") {
            self.web.admin_token = Some(value);
        }
    }
}

fn default_port() -> u16 {
    9005
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_use_privileged_intents() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_delete_delay_seconds() -> u32 {
    20
}

fn default_user_cooldown_seconds() -> u32 {
    10
}

fn default_max_creations_per_minute() -> usize {
    5
}

fn default_config_cache_ttl_seconds() -> u64 {
    300
}
