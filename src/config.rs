use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

use crate::client::ClientSettings;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
}

/// Connection settings for the graph client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Database URI, e.g. `embedded:///var/lib/app/graph.db`
    pub uri: String,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Environment variable holding the password. The password itself is
    /// never read from the config file.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Generate identifiers as 32 hex digits instead of the hyphenated form
    #[serde(default)]
    pub strip_hyphens: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_password_env() -> String {
    "OGM_PASSWORD".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in OGM_CONFIG environment variable
    /// 2. ./ogm.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("OGM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("ogm.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        Url::parse(&self.client.uri)
            .with_context(|| format!("client.uri is not a valid URI: {}", self.client.uri))?;

        if self.client.log_level.trim().is_empty() {
            anyhow::bail!("client.log_level must not be empty");
        }

        if self.client.password_env.trim().is_empty() {
            anyhow::bail!("client.password_env must name an environment variable");
        }

        Ok(())
    }

    /// Client settings with the password resolved from the environment.
    ///
    /// Credentials are attached only when both the user name and the
    /// password are present and non-blank.
    pub fn client_settings(&self) -> ClientSettings {
        let password = std::env::var(&self.client.password_env).unwrap_or_default();
        let user_name = self.client.user_name.clone().unwrap_or_default();

        ClientSettings::new(self.client.uri.clone())
            .with_credentials(&user_name, &password)
            .strip_hyphens(self.client.strip_hyphens)
    }

    pub fn log_level(&self) -> &str {
        &self.client.log_level
    }
}
