use std::fmt;
use std::time::Duration;

use config::{Config, Environment, File};
use reqwest::Url;
use serde::Deserialize;

use crate::error::ConfigurationError;

pub const ENV_PREFIX: &str = "JOURNAL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JournalConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            password: String::new(),
            max_connections: 5,
            connect_timeout_seconds: 10,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub chat_url: String,
    pub entry_update_url: String,
    pub bearer_token: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chat_url: String::new(),
            entry_update_url: String::new(),
            bearer_token: String::new(),
            timeout_seconds: 30,
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("chat_url", &self.chat_url)
            .field("entry_update_url", &self.entry_update_url)
            .field("bearer_token", &"<redacted>")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

impl JournalConfig {
    /// Load from an optional TOML file overlaid with `JOURNAL_*` environment variables,
    /// e.g. `JOURNAL_GATEWAY__BEARER_TOKEN`.
    pub fn load(path: &str) -> Result<Self, ConfigurationError> {
        let source = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Self::from_config(source)
    }

    pub fn from_config(source: Config) -> Result<Self, ConfigurationError> {
        let config: JournalConfig = source.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Every required setting must be present and well-formed before anything connects.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        require("database.url", &self.database.url)?;
        require("database.password", &self.database.password)?;
        require("gateway.chat_url", &self.gateway.chat_url)?;
        require("gateway.entry_update_url", &self.gateway.entry_update_url)?;
        require("gateway.bearer_token", &self.gateway.bearer_token)?;

        let db_url = parse_url("database.url", &self.database.url)?;
        if !matches!(db_url.scheme(), "postgres" | "postgresql") {
            return Err(ConfigurationError::Invalid {
                key: "database.url",
                reason: format!("unsupported scheme `{}`", db_url.scheme()),
            });
        }

        for (key, value) in [
            ("gateway.chat_url", &self.gateway.chat_url),
            ("gateway.entry_update_url", &self.gateway.entry_update_url),
        ] {
            let url = parse_url(key, value)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigurationError::Invalid {
                    key,
                    reason: format!("unsupported scheme `{}`", url.scheme()),
                });
            }
        }

        if self.gateway.timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                key: "gateway.timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::Invalid {
                key: "database.max_connections",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn require(key: &'static str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::Missing(key));
    }
    Ok(())
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigurationError> {
    Url::parse(value).map_err(|e| ConfigurationError::Invalid {
        key,
        reason: e.to_string(),
    })
}
