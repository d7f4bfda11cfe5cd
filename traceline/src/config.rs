//! Tracker configuration
//!
//! Options can be built in code via [`TrackerConfig::new`] or loaded from
//! `~/.config/traceline/config.toml`.
//!
//! On-disk locations follow the XDG Base Directory Specification:
//! config under `$XDG_CONFIG_HOME/traceline/`, the SQLite store under
//! `$XDG_DATA_HOME/traceline/` and logs under `$XDG_STATE_HOME/traceline/`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Best-effort home directory.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `$XDG_CONFIG_HOME`, defaulting to ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// `$XDG_DATA_HOME`, defaulting to ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// `$XDG_STATE_HOME`, defaulting to ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Deployment environment tag attached to every outbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Tracker configuration
///
/// Only `api_key` is required; everything else has a sensible default.
/// Non-data options (the track callback, the source-map URL deriving
/// function, collaborator overrides) live on
/// [`TrackerBuilder`](crate::TrackerBuilder).
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// API key identifying the integrating application (required)
    pub api_key: String,

    /// Base URL of the collection endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Payload encryption key; a built-in non-secure fallback is used when
    /// absent
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Static user info attached to every record
    #[serde(default)]
    pub user: Option<serde_json::Value>,

    /// Forward errors from the host's uncaught-error hook
    #[serde(default = "default_true")]
    pub capture_uncaught_errors: bool,

    /// Emit `app.closed` from the page-leave hook
    #[serde(default = "default_true")]
    pub capture_page_close: bool,

    /// Emit `page.changed` from the navigation hook
    #[serde(default)]
    pub capture_navigation: bool,

    /// Seconds of inactivity before a new session starts
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Rotate the session when the local calendar day changes
    #[serde(default)]
    pub new_day_new_session: bool,

    /// App version tag
    #[serde(default)]
    pub version: Option<String>,

    /// Whether `warning()` records are sent at all
    #[serde(default)]
    pub track_warnings: bool,

    /// Deployment environment tag
    #[serde(default)]
    pub environment: Environment,

    /// Resolve error stack frames through the registered frame resolver
    #[serde(default)]
    pub sourcemap: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level filter: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_url() -> String {
    "https://collect.traceline.dev".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_timeout() -> u64 {
    30 * 60
}

fn default_request_timeout() -> u64 {
    30
}

impl TrackerConfig {
    /// Create a configuration with defaults for everything but the API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: default_api_url(),
            encryption_key: None,
            user: None,
            capture_uncaught_errors: true,
            capture_page_close: true,
            capture_navigation: false,
            session_timeout_secs: default_session_timeout(),
            new_day_new_session: false,
            version: None,
            track_warnings: false,
            environment: Environment::default(),
            sourcemap: false,
            request_timeout_secs: default_request_timeout(),
            logging: LoggingConfig::default(),
        }
    }

    /// Reject configurations an integrator got wrong
    ///
    /// A missing API key is integrator misuse and surfaces immediately;
    /// runtime conditions (offline, storage trouble) never do.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api_key is required".to_string()));
        }
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("api_url must not be empty".to_string()));
        }
        if self.session_timeout_secs == 0 {
            return Err(Error::Config(
                "session_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the config file at the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read and parse a config file
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: TrackerConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Default config file location: `$XDG_CONFIG_HOME/traceline/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("traceline").join("config.toml")
    }

    /// Data directory holding the SQLite store: `$XDG_DATA_HOME/traceline/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("traceline")
    }

    /// State directory holding logs: `$XDG_STATE_HOME/traceline/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("traceline")
    }

    /// Database file inside [`TrackerConfig::data_dir`]
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("traceline.db")
    }

    /// Log file inside [`TrackerConfig::state_dir`]
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("traceline.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::new("tl_live_test");
        assert_eq!(config.api_key, "tl_live_test");
        assert_eq!(config.session_timeout_secs, 1800);
        assert_eq!(config.environment, Environment::Production);
        assert!(config.capture_uncaught_errors);
        assert!(config.capture_page_close);
        assert!(!config.capture_navigation);
        assert!(!config.track_warnings);
        assert!(!config.sourcemap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
api_key = "tl_live_xxxxxxxxxxxx"
api_url = "https://collect.example.com"
session_timeout_secs = 600
new_day_new_session = true
environment = "staging"
version = "2.4.1"

[logging]
level = "debug"
"#;
        let config: TrackerConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.api_key, "tl_live_xxxxxxxxxxxx");
        assert_eq!(config.api_url, "https://collect.example.com");
        assert_eq!(config.session_timeout_secs, 600);
        assert!(config.new_day_new_session);
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.version.as_deref(), Some("2.4.1"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation() {
        let config = TrackerConfig::new("");
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::new("tl_live_test");
        config.session_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::new("tl_live_test");
        config.api_url = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_serializes_lowercase() {
        assert_eq!(Environment::Development.as_str(), "development");
        assert_eq!(
            serde_json::to_value(Environment::Staging).unwrap(),
            serde_json::json!("staging")
        );
    }

    #[test]
    fn test_paths() {
        assert!(TrackerConfig::database_path().ends_with("traceline/traceline.db"));
        assert!(TrackerConfig::log_path().ends_with("traceline/traceline.log"));
    }
}
