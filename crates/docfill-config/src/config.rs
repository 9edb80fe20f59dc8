//! Configuration management for the client session core.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default API base URL (can be overridden at compile time via DOCFILL_API_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("DOCFILL_API_URL") {
    Some(url) => url,
    None => "https://api.docfill.app/api/v1/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Refresh this many seconds before the access token expires.
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 5 * 60;

/// Consecutive failed logins before the client-side lock engages.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Client-side lock duration.
pub const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 15 * 60;

/// Key of the durable session record.
pub const DEFAULT_STORAGE_KEY: &str = "auth-storage";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the REST API, with a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Proactive refresh window before token expiry, in seconds.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    /// Failed logins tolerated before the client-side lock.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Client-side lock duration in seconds.
    #[serde(default = "default_lockout_duration_secs")]
    pub lockout_duration_secs: u64,
    /// Storage key of the persisted session record.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Per-request timeout for auth calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_refresh_buffer_secs() -> u64 {
    DEFAULT_REFRESH_BUFFER_SECS
}

fn default_max_login_attempts() -> u32 {
    DEFAULT_MAX_LOGIN_ATTEMPTS
}

fn default_lockout_duration_secs() -> u64 {
    DEFAULT_LOCKOUT_DURATION_SECS
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
            storage_key: default_storage_key(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables are applied last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("DOCFILL_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(url) = std::env::var("DOCFILL_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            self.api_base_url = url;
        }
    }

    /// Reject values the session core cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_base_url()?;
        if self.max_login_attempts == 0 {
            return Err(CoreError::Config(
                "max_login_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(CoreError::Config("storage_key must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    /// Runtime settings consumed by the session core.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            refresh_buffer: Duration::from_secs(self.refresh_buffer_secs),
            max_login_attempts: self.max_login_attempts,
            lockout_duration: Duration::from_secs(self.lockout_duration_secs),
            storage_key: self.storage_key.clone(),
        }
    }

    /// Per-request timeout for the HTTP auth client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings the session state machine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Window before expiry in which a token counts as expiring soon.
    pub refresh_buffer: Duration,
    /// Consecutive failures before the client-side lock.
    pub max_login_attempts: u32,
    /// How long the client-side lock lasts.
    pub lockout_duration: Duration,
    /// Storage key of the persisted record.
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.refresh_buffer_secs, 300);
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.lockout_duration_secs, 900);
        assert_eq!(config.storage_key, "auth-storage");
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "refresh_buffer_secs": 120 }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.refresh_buffer_secs, 120);
        assert_eq!(config.max_login_attempts, DEFAULT_MAX_LOGIN_ATTEMPTS);
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            lockout_duration_secs: 60,
            storage_key: "custom-key".to_string(),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.lockout_duration_secs, 60);
        assert_eq!(loaded.storage_key, "custom-key");
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.refresh_buffer_secs, DEFAULT_REFRESH_BUFFER_SECS);
    }

    #[test]
    fn test_config_rejects_zero_attempts() {
        let config = Config {
            max_login_attempts: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_rejects_zero_request_timeout() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), r#"{ "request_timeout_secs": 0 }"#).unwrap();

        let err = Config::load(&paths).unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            api_base_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.api_base_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_conversion() {
        let config = Config {
            refresh_buffer_secs: 120,
            lockout_duration_secs: 30,
            ..Config::default()
        };
        let session = config.session();
        assert_eq!(session.refresh_buffer, Duration::from_secs(120));
        assert_eq!(session.lockout_duration, Duration::from_secs(30));
        assert_eq!(session.max_login_attempts, 5);
        assert_eq!(SessionConfig::default().storage_key, DEFAULT_STORAGE_KEY);
    }
}
