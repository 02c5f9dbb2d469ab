use clap::ValueEnum;
use reqwest::Url;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::delivery::{ClientOptions, DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_TIMEOUT};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode config file {path}: {source}")]
    Decode {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Google Chat webhook URL is required")]
    MissingWebhookUrl,
    #[error("invalid webhook URL format: {0}")]
    InvalidWebhookUrl(String),
    #[error("Google Chat webhook URL must use HTTPS")]
    InsecureWebhookUrl,
    #[error("invalid listen address {0:?}")]
    InvalidListenAddr(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Display, ValueEnum, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub google_chat: GoogleChatSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct GoogleChatSection {
    pub webhook_url: String,
    pub timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
}

impl Default for GoogleChatSection {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            pool_idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
}

/// Values given on the command line or through the environment. Anything set
/// here wins over the config file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides {
    pub listen_addr: Option<String>,
    pub webhook_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub pool_idle_timeout_secs: Option<u64>,
    pub log_level: Option<LogLevel>,
}

/// Settings a validated [`Config`] resolves to.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub webhook_url: Url,
    pub client: ClientOptions,
    pub log_level: LogLevel,
}

impl Config {
    /// Reads `path` if it exists; a missing file leaves every value at its
    /// default.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.listen_addr {
            self.server.listen_addr = v;
        }
        if let Some(v) = overrides.webhook_url {
            self.google_chat.webhook_url = v;
        }
        if let Some(v) = overrides.timeout_secs {
            self.google_chat.timeout_secs = v;
        }
        if let Some(v) = overrides.pool_idle_timeout_secs {
            self.google_chat.pool_idle_timeout_secs = v;
        }
        if let Some(v) = overrides.log_level {
            self.logging.level = v;
        }
    }

    pub fn load(path: &Path, overrides: Overrides) -> Result<Settings, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply(overrides);
        config.validate()
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let webhook_url = &self.google_chat.webhook_url;
        if webhook_url.is_empty() {
            return Err(ConfigError::MissingWebhookUrl);
        }
        let webhook_url =
            Url::parse(webhook_url).map_err(|e| ConfigError::InvalidWebhookUrl(e.to_string()))?;
        if webhook_url.scheme() != "https" {
            return Err(ConfigError::InsecureWebhookUrl);
        }

        let listen_addr = self
            .server
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.server.listen_addr.clone()))?;

        if self.google_chat.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("timeout_secs"));
        }
        if self.google_chat.pool_idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("pool_idle_timeout_secs"));
        }

        Ok(Settings {
            listen_addr,
            webhook_url,
            client: ClientOptions {
                timeout: Duration::from_secs(self.google_chat.timeout_secs),
                pool_idle_timeout: Duration::from_secs(self.google_chat.pool_idle_timeout_secs),
            },
            log_level: self.logging.level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const WEBHOOK: &str = "https://chat.googleapis.com/v1/spaces/AAA/messages?key=k&token=t";

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("alertchat_{}_{}.toml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.google_chat.timeout_secs, 10);
        assert_eq!(config.google_chat.pool_idle_timeout_secs, 90);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("alertchat_does_not_exist.toml");
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_from_file() {
        let path = write_config(
            "full",
            &format!(
                r#"
[server]
listen_addr = "127.0.0.1:9000"

[google_chat]
webhook_url = "{}"
timeout_secs = 3

[logging]
level = "debug"
"#,
                WEBHOOK
            ),
        );
        let config = Config::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.google_chat.webhook_url, WEBHOOK);
        assert_eq!(config.google_chat.timeout_secs, 3);
        assert_eq!(config.google_chat.pool_idle_timeout_secs, 90);
        assert_eq!(config.logging.level, LogLevel::Debug);

        let settings = config.validate().unwrap();
        assert_eq!(settings.listen_addr.port(), 9000);
        assert_eq!(settings.client.timeout, Duration::from_secs(3));
        assert_eq!(settings.client.pool_idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_from_file_decode_error() {
        let path = write_config("broken", "[server\nlisten_addr = ");
        let result = Config::from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Decode { .. })));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let path = write_config(
            "override",
            "[server]\nlisten_addr = \"127.0.0.1:9000\"\n[logging]\nlevel = \"error\"\n",
        );
        let overrides = Overrides {
            listen_addr: Some("127.0.0.1:9100".to_string()),
            webhook_url: Some(WEBHOOK.to_string()),
            pool_idle_timeout_secs: Some(30),
            ..Default::default()
        };
        let settings = Config::load(&path, overrides).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(settings.listen_addr.port(), 9100);
        assert_eq!(settings.webhook_url.as_str(), WEBHOOK);
        assert_eq!(settings.client.pool_idle_timeout, Duration::from_secs(30));
        assert_eq!(settings.log_level, LogLevel::Error);
    }

    #[test]
    fn test_validate_requires_webhook_url() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingWebhookUrl)
        ));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = Config::default();
        config.google_chat.webhook_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWebhookUrl(_))
        ));

        config.google_chat.webhook_url = "http://chat.googleapis.com/v1/spaces/AAA".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InsecureWebhookUrl)
        ));
    }

    #[test]
    fn test_validate_listen_addr_and_timeouts() {
        let mut config = Config::default();
        config.google_chat.webhook_url = WEBHOOK.to_string();
        config.server.listen_addr = ":7000".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr(_))
        ));

        config.server.listen_addr = DEFAULT_LISTEN_ADDR.to_string();
        config.google_chat.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("timeout_secs"))
        ));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(<LogLevel as FromStr>::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert!(<LogLevel as FromStr>::from_str("trace").is_err());

        let path = write_config("badlevel", "[logging]\nlevel = \"verbose\"\n");
        let result = Config::from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Decode { .. })));
    }
}
